/// PCSC APDU - ISO7816-4 command/response codec and BER-TLV decoder
///
/// This library builds command APDUs for every ISO7816-4 case, follows the
/// GET RESPONSE protocol over any byte transport, and decodes BER-TLV data
/// objects into typed ASN.1 values.
pub mod cli;
pub mod core;

// Re-export commonly used types
pub use crate::core::{
    apdu::{Apdu, ApduMeta, Case, Command, Protocol},
    asn1::{to_data_object, DataObject, DecodeOptions},
    error::{CodecError, CodecResult},
    exchange::{exchange, ExchangeConfig, ExchangeError, ProtocolControl, Received, Transport},
    response::{Response, ResponseFragment, StatusWord},
    tlv::{parse, parse_all, Tag, TagClass, TlvNode},
    utils::{format_hex, parse_hex},
};
