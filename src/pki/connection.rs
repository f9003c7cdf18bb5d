//! Live broker connection and its credential.
//!
//! The connection manager is the single owner of the server's broker
//! session. Rotation connects with the new credential first and only then
//! swaps it in under the write lock, so publishes never see a half-swapped
//! connection and a failed reconnect leaves the old session untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::BrokerError;

use super::certificate::ServerCertificate;

/// Opens broker sessions with a given client certificate.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, certificate: &ServerCertificate) -> Result<Box<dyn BrokerSession>, BrokerError>;
}

/// One authenticated broker session.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    async fn disconnect(self: Box<Self>);
}

/// Connector used when no broker client is wired in: credentials are
/// tracked but nothing is sent.
#[derive(Debug, Default)]
pub struct DetachedConnector;

struct DetachedSession {
    serial_number: String,
}

#[async_trait]
impl BrokerConnector for DetachedConnector {
    async fn connect(&self, certificate: &ServerCertificate) -> Result<Box<dyn BrokerSession>, BrokerError> {
        log::info!(
            "BROKER_DETACHED serial={} common_name={}",
            certificate.serial_number,
            certificate.common_name
        );
        Ok(Box::new(DetachedSession {
            serial_number: certificate.serial_number.clone(),
        }))
    }
}

#[async_trait]
impl BrokerSession for DetachedSession {
    async fn publish(&self, topic: &str, _payload: &[u8]) -> Result<(), BrokerError> {
        log::warn!("BROKER_PUBLISH_DROPPED topic={} serial={}", topic, self.serial_number);
        Err(BrokerError::NotConnected)
    }

    async fn disconnect(self: Box<Self>) {}
}

struct LiveConnection {
    certificate: ServerCertificate,
    session: Box<dyn BrokerSession>,
}

pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    live: RwLock<Option<LiveConnection>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            live: RwLock::new(None),
        }
    }

    /// Certificate currently live on the connection.
    pub async fn active_certificate(&self) -> Option<ServerCertificate> {
        self.live
            .read()
            .await
            .as_ref()
            .map(|live| live.certificate.clone())
    }

    pub async fn is_connected(&self) -> bool {
        self.live.read().await.is_some()
    }

    /// Replace the live credential.
    ///
    /// The new session is established before the old one is released; on
    /// connect failure the current session stays live.
    pub async fn swap_credentials(&self, certificate: ServerCertificate) -> Result<(), BrokerError> {
        let session = self.connector.connect(&certificate).await?;
        let serial = certificate.serial_number.clone();

        let previous = {
            let mut live = self.live.write().await;
            live.replace(LiveConnection {
                certificate,
                session,
            })
        };

        match previous {
            Some(old) => {
                log::info!(
                    "BROKER_CREDENTIALS_SWAPPED old_serial={} new_serial={}",
                    old.certificate.serial_number,
                    serial
                );
                old.session.disconnect().await;
            }
            None => log::info!("BROKER_CONNECTED serial={}", serial),
        }
        Ok(())
    }

    /// Publish on the live session. Blocks while a swap holds the lock.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let live = self.live.read().await;
        match live.as_ref() {
            Some(connection) => connection.session.publish(topic, payload).await,
            None => Err(BrokerError::NotConnected),
        }
    }

    pub async fn shutdown(&self) {
        let previous = self.live.write().await.take();
        if let Some(old) = previous {
            log::info!("BROKER_DISCONNECTED serial={}", old.certificate.serial_number);
            old.session.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingConnector {
        log: Arc<Mutex<Vec<String>>>,
        refuse: Mutex<bool>,
    }

    struct RecordingSession {
        serial: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BrokerConnector for RecordingConnector {
        async fn connect(&self, certificate: &ServerCertificate) -> Result<Box<dyn BrokerSession>, BrokerError> {
            if *self.refuse.lock() {
                return Err(BrokerError::Connect("tls handshake failed".to_string()));
            }
            self.log.lock().push(format!("connect {}", certificate.serial_number));
            Ok(Box::new(RecordingSession {
                serial: certificate.serial_number.clone(),
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[async_trait]
    impl BrokerSession for RecordingSession {
        async fn publish(&self, topic: &str, _payload: &[u8]) -> Result<(), BrokerError> {
            self.log.lock().push(format!("publish {} via {}", topic, self.serial));
            Ok(())
        }

        async fn disconnect(self: Box<Self>) {
            self.log.lock().push(format!("disconnect {}", self.serial));
        }
    }

    fn cert(serial: &str) -> ServerCertificate {
        let issued_at = Utc::now();
        ServerCertificate {
            certificate: "CERT".to_string(),
            private_key: "KEY".to_string(),
            issuing_ca: "CA".to_string(),
            serial_number: serial.to_string(),
            common_name: "ares-server".to_string(),
            issued_at,
            expiration: issued_at + Duration::hours(720),
        }
    }

    #[tokio::test]
    async fn test_swap_connects_new_before_dropping_old() {
        let connector = Arc::new(RecordingConnector::default());
        let manager = ConnectionManager::new(connector.clone());

        manager.swap_credentials(cert("a")).await.unwrap();
        manager.publish("ares4/x", b"1").await.unwrap();
        manager.swap_credentials(cert("b")).await.unwrap();
        manager.publish("ares4/x", b"2").await.unwrap();

        assert_eq!(
            *connector.log.lock(),
            vec![
                "connect a",
                "publish ares4/x via a",
                "connect b",
                "disconnect a",
                "publish ares4/x via b",
            ]
        );
        assert_eq!(manager.active_certificate().await.unwrap().serial_number, "b");
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_old_session() {
        let connector = Arc::new(RecordingConnector::default());
        let manager = ConnectionManager::new(connector.clone());
        manager.swap_credentials(cert("a")).await.unwrap();

        *connector.refuse.lock() = true;
        assert!(manager.swap_credentials(cert("b")).await.is_err());
        assert_eq!(manager.active_certificate().await.unwrap().serial_number, "a");
    }

    #[tokio::test]
    async fn test_publish_without_session() {
        let manager = ConnectionManager::new(Arc::new(DetachedConnector));
        assert!(matches!(
            manager.publish("t", b"").await,
            Err(BrokerError::NotConnected)
        ));

        manager.swap_credentials(cert("a")).await.unwrap();
        assert!(manager.is_connected().await);
        manager.shutdown().await;
        assert!(!manager.is_connected().await);
    }
}
