use std::{future::Future, io};

#[cfg(target_os = "linux")]
use edgelake_core::config::RuntimeType;
use edgelake_core::config::RuntimeConfig;
#[cfg(target_os = "linux")]
use monoio::{utils::detect_uring, IoUringDriver};
use monoio::{time::TimeDriver, LegacyDriver, Runtime, RuntimeBuilder};

#[cfg(target_os = "linux")]
const MIN_SQPOLL_IDLE_TIME: u32 = 1000;

pub enum RuntimeWrapper {
    #[cfg(target_os = "linux")]
    IoUring(Runtime<TimeDriver<IoUringDriver>>),
    Legacy(Runtime<TimeDriver<LegacyDriver>>),
}

impl RuntimeWrapper {
    /// io_uring is used when configured and supported by the kernel, the legacy driver
    /// otherwise.
    pub fn build(config: &RuntimeConfig) -> io::Result<Self> {
        #[cfg(target_os = "linux")]
        if config.runtime_type == RuntimeType::IoUring && detect_uring() {
            let mut builder = RuntimeBuilder::<IoUringDriver>::new();
            if let Some(idle) = config.sqpoll_idle {
                let mut uring_builder = io_uring::IoUring::builder();
                uring_builder.setup_sqpoll(MIN_SQPOLL_IDLE_TIME.max(idle));
                builder = builder.uring_builder(uring_builder);
            }
            let runtime = builder.enable_timer().with_entries(config.entries).build()?;
            return Ok(RuntimeWrapper::IoUring(runtime));
        }

        let runtime = RuntimeBuilder::<LegacyDriver>::new()
            .enable_timer()
            .with_entries(config.entries)
            .build()?;
        Ok(RuntimeWrapper::Legacy(runtime))
    }

    pub fn block_on<F>(&mut self, future: F) -> F::Output
    where
        F: Future,
    {
        match self {
            #[cfg(target_os = "linux")]
            RuntimeWrapper::IoUring(driver) => driver.block_on(future),
            RuntimeWrapper::Legacy(driver) => driver.block_on(future),
        }
    }
}
