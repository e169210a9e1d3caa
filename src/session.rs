// src/session.rs
//
// Async front for collaborators (UI bridges, services).
//
// The engine is blocking by nature: every operation sleeps between frames
// and polls the transport. `ActuatorSession` moves each call onto tokio's
// blocking pool and holds the connection behind a mutex, so concurrent
// callers are serialised and only one request is ever on the wire.

use std::sync::{Arc, Mutex};

use crate::actuator::{Connection, ConnectionState, MemoryImage, ProgError, TelemetrySample};
use crate::io::{CanPort, ChannelSpec};
use crate::settings::ProtocolConfig;

/// Shareable handle onto one actuator connection.
#[derive(Clone, Debug)]
pub struct ActuatorSession {
    inner: Arc<Mutex<Connection>>,
}

impl ActuatorSession {
    /// Open the channel on the blocking pool.
    pub async fn connect(spec: ChannelSpec, config: ProtocolConfig) -> Result<Self, ProgError> {
        let conn = tokio::task::spawn_blocking(move || Connection::connect(&spec, config))
            .await
            .map_err(|e| ProgError::Worker(format!("Connect task failed: {}", e)))??;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already-open port (simulators, custom transports).
    pub fn with_port(port: Box<dyn CanPort>, config: ProtocolConfig) -> Result<Self, ProgError> {
        Ok(Self::from_connection(Connection::with_port(port, config)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run one engine operation on the blocking pool with exclusive access
    /// to the connection.
    async fn run<T, F>(&self, op: F) -> Result<T, ProgError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ProgError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut conn = inner
                .lock()
                .map_err(|_| ProgError::Worker("connection lock poisoned".to_string()))?;
            op(&mut *conn)
        })
        .await
        .map_err(|e| ProgError::Worker(format!("Engine task failed: {}", e)))?
    }

    pub async fn state(&self) -> Result<ConnectionState, ProgError> {
        self.run(|conn| Ok(conn.state())).await
    }

    pub async fn disconnect(&self) -> Result<(), ProgError> {
        self.run(|conn| conn.disconnect()).await
    }

    pub async fn read_memory(&self) -> Result<MemoryImage, ProgError> {
        self.run(|conn| conn.read_memory()).await
    }

    pub async fn read_min_max(&self) -> Result<(u16, u16), ProgError> {
        self.run(|conn| conn.read_min_max()).await
    }

    pub async fn read_min(&self) -> Result<u16, ProgError> {
        self.run(|conn| conn.read_min()).await
    }

    pub async fn read_max(&self) -> Result<u16, ProgError> {
        self.run(|conn| conn.read_max()).await
    }

    pub async fn set_min(&self, value: u16) -> Result<(), ProgError> {
        self.run(move |conn| conn.set_min(value)).await
    }

    pub async fn set_max(&self, value: u16) -> Result<(), ProgError> {
        self.run(move |conn| conn.set_max(value)).await
    }

    pub async fn set_min_max(&self, min: u16, max: u16) -> Result<(), ProgError> {
        self.run(move |conn| conn.set_min_max(min, max)).await
    }

    pub async fn write_memory_byte(&self, address: u16, value: u16) -> Result<(), ProgError> {
        self.run(move |conn| conn.write_memory_byte(address, value)).await
    }

    pub async fn find_end_positions(&self) -> Result<(u16, u16), ProgError> {
        self.run(|conn| conn.find_end_positions()).await
    }

    pub async fn read_current_position(&self) -> Result<Option<TelemetrySample>, ProgError> {
        self.run(|conn| conn.read_current_position()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedActuator;

    fn sim_session() -> (ActuatorSession, crate::io::SimHandle) {
        let sim = SimulatedActuator::new();
        let handle = sim.handle();
        let session = ActuatorSession::with_port(Box::new(sim), ProtocolConfig::fast()).unwrap();
        (session, handle)
    }

    #[tokio::test]
    async fn test_session_reads_and_writes() {
        let (session, handle) = sim_session();
        handle.set_byte(0x03, 0x01);
        handle.set_byte(0x04, 0x13);

        assert_eq!(session.read_min().await.unwrap(), 0x0113);
        session.write_memory_byte(0x05, 0x02).await.unwrap();
        assert_eq!(handle.memory()[0x05], 0x02);

        let image = session.read_memory().await.unwrap();
        assert_eq!(image.as_bytes(), &handle.memory());
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialised() {
        let (session, handle) = sim_session();
        handle.set_byte(0x05, 0x02);
        handle.set_byte(0x06, 0x20);

        let a = session.clone();
        let b = session.clone();
        let (max, min_max) = tokio::join!(a.read_max(), b.read_min_max());
        assert_eq!(max.unwrap(), 0x0220);
        assert_eq!(min_max.unwrap(), (0x0000, 0x0220));

        // Each operation's frames are contiguous: keepalive, then its reads
        let sent: Vec<u8> = handle.sent_frames().iter().map(|f| f.data()[0]).collect();
        let keepalives: Vec<usize> = sent
            .iter()
            .enumerate()
            .filter(|(_, op)| **op == 0x49)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(keepalives.len(), 2);
        assert!(keepalives[1] == 3 || keepalives[1] == 6);
    }

    #[tokio::test]
    async fn test_session_surfaces_errors() {
        let (session, handle) = sim_session();
        handle.set_ack_enabled(false);
        assert!(matches!(
            session.read_min_max().await,
            Err(ProgError::Timeout(_))
        ));
        assert!(matches!(
            session.write_memory_byte(0x80, 0).await,
            Err(ProgError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_session_disconnect() {
        let (session, _handle) = sim_session();
        session.disconnect().await.unwrap();
        assert_eq!(session.state().await.unwrap(), ConnectionState::Disconnected);
        assert!(matches!(
            session.read_current_position().await,
            Err(ProgError::NotConnected)
        ));
    }
}
