//! `reqwest::Client` as the network side of the cache.
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::transport::Fetcher;

#[async_trait]
impl Fetcher for reqwest::Client {
    type Error = reqwest::Error;

    async fn fetch(
        &self,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Self::Error> {
        let request = reqwest::Request::try_from(request)?;
        let response = self.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut converted = Response::new(body);
        *converted.status_mut() = status;
        *converted.version_mut() = version;
        *converted.headers_mut() = headers;
        Ok(converted)
    }
}
