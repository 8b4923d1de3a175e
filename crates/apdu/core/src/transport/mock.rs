use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;

use super::{CardTransport, TransportError};

/// Scripted transport returning queued responses in order
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    /// Responses (or failures) to return, front first
    pub responses: VecDeque<Result<Bytes, TransportError>>,
    /// Commands that were sent
    pub commands: Vec<Bytes>,
    /// Whether the transport is connected
    pub connected: bool,
    /// Number of times the connection was reset
    pub resets: usize,
}

impl MockTransport {
    /// Create a new mock transport with the given responses
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses: responses.into_iter().map(Ok).collect(),
            commands: Vec::new(),
            connected: true,
            resets: 0,
        }
    }

    /// Create a new mock transport answering every queued command with 90 00
    pub fn with_success(count: usize) -> Self {
        Self::new(vec![Bytes::from_static(&[0x90, 0x00]); count])
    }

    /// Queue a raw response
    pub fn push_response(&mut self, response: impl Into<Bytes>) -> &mut Self {
        self.responses.push_back(Ok(response.into()));
        self
    }

    /// Queue a transport failure
    pub fn push_error(&mut self, error: TransportError) -> &mut Self {
        self.responses.push_back(Err(error));
        self
    }
}

#[async_trait]
impl CardTransport for MockTransport {
    async fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.commands.push(Bytes::copy_from_slice(command));

        match self.responses.pop_front() {
            Some(response) => response,
            None => Err(TransportError::Transmission),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.resets += 1;
        Ok(())
    }
}
