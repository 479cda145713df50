use service_async::Param;

use super::{CacheConfig, Config, ListenerConfig};

/// Path on which raw gateway events are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokePath(pub String);

impl Param<InvokePath> for Config {
    fn param(&self) -> InvokePath {
        InvokePath(self.invoke_path.clone())
    }
}

impl Param<CacheConfig> for Config {
    fn param(&self) -> CacheConfig {
        self.cache.clone()
    }
}

impl Param<ListenerConfig> for Config {
    fn param(&self) -> ListenerConfig {
        self.listener.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_follow_config() {
        let mut config = Config::default();
        config.cache.routing_ttl_secs = 5;
        config.cache.persistent_dir = Some("/var/cache/edgelake".into());
        config.invoke_path = "/events".to_string();

        let cache: CacheConfig = config.param();
        assert_eq!(cache, config.cache);
        assert_eq!(cache.routing_ttl().as_secs(), 5);
        let InvokePath(path) = config.param();
        assert_eq!(path, "/events");
        let listener: ListenerConfig = config.param();
        assert_eq!(listener, config.listener);
    }
}
