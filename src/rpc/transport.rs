//! One chain endpoint behind an ethers HTTP provider

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, TxHash, U256};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::RpcError;

/// The chain calls the monitor needs from a single endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    fn url(&self) -> &str;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    async fn gas_price(&self) -> Result<U256, RpcError>;

    async fn chain_id(&self) -> Result<U256, RpcError>;

    /// Broadcast an already signed transaction
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, RpcError>;
}

/// HTTP endpoint; every request is bounded by the configured timeout
#[derive(Debug)]
pub struct HttpTransport {
    url: String,
    provider: Provider<Http>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        let provider =
            Provider::<Http>::try_from(url.as_str()).map_err(|e| RpcError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            url,
            provider,
            timeout,
        })
    }

    async fn bounded<T, F>(&self, request: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(RpcError::Provider {
                url: self.url.clone(),
                source,
            }),
            Err(_) => Err(RpcError::Timeout {
                url: self.url.clone(),
                after: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.bounded(self.provider.call(&tx, None)).await
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        self.bounded(self.provider.get_gas_price()).await
    }

    async fn chain_id(&self) -> Result<U256, RpcError> {
        self.bounded(self.provider.get_chainid()).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, RpcError> {
        self.bounded(async {
            let pending = self.provider.send_raw_transaction(raw).await?;
            Ok::<_, ProviderError>(pending.tx_hash())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_http_transport_creation() {
        let transport =
            HttpTransport::new("http://localhost:8545", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.url(), "http://localhost:8545");

        let err = HttpTransport::new("not a url", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, RpcError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        // Accepts the connection and never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport =
            HttpTransport::new(format!("http://{}", addr), Duration::from_millis(100)).unwrap();
        let err = transport.gas_price().await.unwrap_err();
        server.abort();

        match err {
            RpcError::Timeout { url, after } => {
                assert_eq!(url, format!("http://{}", addr));
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_provider_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:1", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            transport.chain_id().await,
            Err(RpcError::Provider { .. })
        ));
    }
}
