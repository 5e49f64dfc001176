use crate::core::apdu::Protocol;
use crate::core::exchange::{ProtocolControl, Received, Transport};
use anyhow::{bail, Context as AnyhowContext, Result};
use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE, MAX_BUFFER_SIZE_EXTENDED};
use serde::{Deserialize, Serialize};
use std::ffi::CString;

/// Information about a PCSC reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub name: String,
    pub card_present: bool,
    pub atr: Option<Vec<u8>>,
}

/// PCSC reader manager
pub struct PcscReader {
    context: Context,
    current_reader: Option<String>,
    current_card: Option<Card>,
}

impl PcscReader {
    /// Create a new PCSC reader manager
    pub fn new() -> Result<Self> {
        let context =
            Context::establish(Scope::User).context("Failed to establish PCSC context")?;

        Ok(Self {
            context,
            current_reader: None,
            current_card: None,
        })
    }

    /// List all available readers
    pub fn list_readers(&self) -> Result<Vec<ReaderInfo>> {
        let mut readers_buf = vec![0; 2048];
        let readers = self
            .context
            .list_readers(&mut readers_buf)
            .context("Failed to list readers")?;

        Ok(readers
            .map(|name| {
                let name = name.to_string_lossy().to_string();
                let (card_present, atr) = self.probe(&name);
                ReaderInfo {
                    name,
                    card_present,
                    atr,
                }
            })
            .collect())
    }

    fn probe(&self, reader_name: &str) -> (bool, Option<Vec<u8>>) {
        let Ok(reader_cstr) = CString::new(reader_name) else {
            return (false, None);
        };
        match self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => match card.status2_owned() {
                Ok(status) => (true, Some(status.atr().to_vec())),
                Err(_) => (true, None),
            },
            Err(_) => (false, None),
        }
    }

    /// Resolve a reader given by index into the reader list, or by name
    pub fn resolve(&self, name_or_index: &str) -> Result<String> {
        let Ok(index) = name_or_index.parse::<usize>() else {
            return Ok(name_or_index.to_string());
        };

        let readers = self.list_readers()?;
        match readers.get(index) {
            Some(reader) => Ok(reader.name.clone()),
            None if readers.is_empty() => bail!("No PCSC readers found"),
            None => bail!(
                "Reader index {} out of range (0-{})",
                index,
                readers.len() - 1
            ),
        }
    }

    /// Connect to a specific reader
    pub fn connect(&mut self, reader_name: &str, share_mode: ShareMode) -> Result<()> {
        log::info!("Connecting to reader: {}", reader_name);

        let reader_cstr = CString::new(reader_name).context("Invalid reader name")?;
        let card = self
            .context
            .connect(&reader_cstr, share_mode, Protocols::ANY)
            .with_context(|| format!("Failed to connect to reader: {reader_name}"))?;

        self.current_reader = Some(reader_name.to_string());
        self.current_card = Some(card);

        log::info!("Successfully connected to reader: {}", reader_name);
        Ok(())
    }

    /// Disconnect from current reader
    pub fn disconnect(&mut self) {
        if let Some(card) = self.current_card.take() {
            if card.disconnect(pcsc::Disposition::LeaveCard).is_err() {
                log::warn!("Failed to disconnect cleanly from card");
            }
        }

        if self.current_reader.take().is_some() {
            log::info!("Disconnected from reader");
        }
    }

    /// Get the currently connected reader name
    pub fn current_reader(&self) -> Option<&str> {
        self.current_reader.as_deref()
    }

    /// Transport over the connected card
    pub fn transport(&self) -> Result<CardTransport<'_>> {
        let card = self
            .current_card
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No card connected"))?;

        let protocol = card
            .status2_owned()
            .context("Failed to read card status")?
            .protocol2()
            .map_or(Protocol::Undefined, Protocol::from);

        Ok(CardTransport { card, protocol })
    }
}

impl Drop for PcscReader {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl From<pcsc::Protocol> for Protocol {
    fn from(protocol: pcsc::Protocol) -> Self {
        match protocol {
            pcsc::Protocol::T0 => Protocol::T0,
            pcsc::Protocol::T1 => Protocol::T1,
            pcsc::Protocol::RAW => Protocol::Raw,
        }
    }
}

/// [`Transport`] backed by `SCardTransmit` on a connected card
pub struct CardTransport<'a> {
    card: &'a Card,
    protocol: Protocol,
}

impl CardTransport<'_> {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl Transport for CardTransport<'_> {
    type Error = pcsc::Error;

    fn transmit(&mut self, command: &[u8], receive_size: usize) -> Result<Received, pcsc::Error> {
        let size = receive_size.clamp(MAX_BUFFER_SIZE, MAX_BUFFER_SIZE_EXTENDED);
        let mut response_buf = vec![0; size];

        let response = self.card.transmit(command, &mut response_buf)?;

        Ok(Received {
            bytes: response.to_vec(),
            control: ProtocolControl {
                protocol: self.protocol,
                extra: Vec::new(),
            },
        })
    }
}
