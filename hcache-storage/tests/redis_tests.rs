#![cfg(feature = "redis")]

#[cfg(test)]
mod tests {
    use dotenvy::dotenv;
    use hcache_storage::{CacheStorage, RedisStorage, SecretConfig, SecureStorage};
    use rustis::client::Client;
    use std::time::Duration;

    async fn get_redis_connection() -> Client {
        dotenv().ok();
        let uri = std::env::var("REDIS_URI").expect("Set REDIS_URI env variable");
        Client::connect(uri)
            .await
            .expect("Error while establishing redis connection")
    }

    #[tokio::test]
    async fn test_typical_workflow() {
        let redis = get_redis_connection().await;
        let storage = RedisStorage::new(redis, "hcache-test-workflow", None)
            .await
            .expect("Failed to create RedisStorage");
        let key = "https://example.com/workflow";

        storage.delete(key).await.unwrap();
        assert!(storage.get(key).await.unwrap().is_none());

        storage.set(key, b"\x00binary\xffpayload").await.unwrap();
        assert_eq!(
            storage.get(key).await.unwrap().unwrap(),
            b"\x00binary\xffpayload"
        );

        storage.delete(key).await.unwrap();
        assert!(storage.get(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry_reads_as_missing() {
        let redis = get_redis_connection().await;
        let storage = RedisStorage::new(
            redis,
            "hcache-test-ttl",
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();
        let key = "https://example.com/ttl";

        storage.set(key, b"short lived").await.unwrap();
        assert!(storage.get(key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(storage.get(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secure_wrapper_over_redis() {
        let redis = get_redis_connection().await;
        let backend = RedisStorage::new(redis, "hcache-test-secure", None)
            .await
            .unwrap();
        let storage = SecureStorage::encrypted(
            backend,
            &SecretConfig::new("redis-secret").with_iterations(1_000),
        )
        .unwrap();
        let key = "https://example.com/secure";

        storage.set(key, b"sealed").await.unwrap();
        assert_eq!(storage.get(key).await.unwrap().unwrap(), b"sealed");
        assert!(storage.inner().get(key).await.unwrap().is_none());

        storage.delete(key).await.unwrap();
    }
}
