use crate::core::apdu::{Command, Protocol, INS_GET_RESPONSE};
use crate::core::error::CodecError;
use crate::core::response::{Response, ResponseFragment};
use crate::core::utils::format_hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol control information returned by the transport with each response.
/// The codec stores it alongside the fragment and never looks inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolControl {
    pub protocol: Protocol,
    pub extra: Vec<u8>,
}

/// Bytes received in one round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub bytes: Vec<u8>,
    pub control: ProtocolControl,
}

/// Synchronous byte exchange with a card
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
pub trait Transport {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send an encoded command. `receive_size` is the buffer size the
    /// response needs (Le plus status bytes).
    fn transmit(&mut self, command: &[u8], receive_size: usize)
        -> Result<Received, Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn transmit(
        &mut self,
        command: &[u8],
        receive_size: usize,
    ) -> Result<Received, Self::Error> {
        (**self).transmit(command, receive_size)
    }
}

/// Failure of a multi-round exchange
#[derive(Debug, Error)]
pub enum ExchangeError<E: std::error::Error + 'static> {
    #[error("Transport error: {0}")]
    Transport(#[source] E),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Continuation protocol settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Upper bound on GET RESPONSE rounds
    pub max_rounds: u16,
    /// Instruction byte used for GET RESPONSE
    pub get_response_ins: u8,
    /// Re-issue the command once with the corrected Le on `6Cxx`
    pub retry_wrong_length: bool,
    /// Fetch remaining data on `61xx`
    pub follow_more_data: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_rounds: 255,
            get_response_ins: INS_GET_RESPONSE,
            retry_wrong_length: true,
            follow_more_data: true,
        }
    }
}

fn round<T: Transport>(
    transport: &mut T,
    command: &Command,
) -> Result<(ResponseFragment, ProtocolControl), ExchangeError<T::Error>> {
    let bytes = command.encode()?;
    log::debug!("Transmitting APDU: {}", format_hex(&bytes));

    let received = transport
        .transmit(&bytes, command.expected_response_size())
        .map_err(ExchangeError::Transport)?;
    log::debug!("Received response: {}", format_hex(&received.bytes));

    let fragment = ResponseFragment::decode_for(received.bytes, command)?;
    Ok((fragment, received.control))
}

/// Send `command` and follow the GET RESPONSE / wrong-length protocol until
/// the card returns a final status.
///
/// `61xx` appends the fragment and fetches xx more bytes. `6Cxx` on the
/// first answer re-sends the original command once with Le = xx and drops
/// the rejected answer. Anything else ends the exchange. A transport error
/// aborts the whole exchange and discards collected fragments.
pub fn exchange<T: Transport>(
    transport: &mut T,
    command: &Command,
    config: &ExchangeConfig,
) -> Result<Response, ExchangeError<T::Error>> {
    let mut response = Response::new();
    let (mut fragment, mut control) = round(transport, command)?;

    if config.retry_wrong_length {
        if let Some(sw2) = fragment.status().exact_length() {
            // SW2 = 00 stands for 256 bytes
            let le = if sw2 == 0 { 256 } else { u32::from(sw2) };
            log::debug!("Wrong length, re-issuing command with Le={le}");
            let corrected = command.with_expected_length(le);
            (fragment, control) = round(transport, &corrected)?;
        }
    }

    let mut rounds: u16 = 0;
    loop {
        let available = fragment.status().bytes_available();
        response.push(fragment, control);

        let available = match available {
            Some(n) if config.follow_more_data => n,
            _ => break,
        };

        if rounds >= config.max_rounds {
            log::warn!(
                "Card still signals more data after {} GET RESPONSE rounds",
                rounds
            );
            return Err(CodecError::ContinuationLimitExceeded {
                limit: config.max_rounds,
            }
            .into());
        }
        rounds += 1;

        log::debug!("{available} bytes available, sending GET RESPONSE");
        let get_response = Command::get_response(
            command.cla,
            config.get_response_ins,
            available,
            command.protocol,
        );
        (fragment, control) = round(transport, &get_response)?;
    }

    log::debug!(
        "Exchange finished after {} rounds with status {}",
        response.len(),
        response
            .status()
            .map_or_else(|| "none".to_string(), |sw| sw.to_string())
    );
    Ok(response)
}
