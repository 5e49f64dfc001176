pub mod apdu;
pub mod asn1;
pub mod error;
pub mod exchange;
pub mod reader;
pub mod response;
pub mod transcript;
pub mod tlv;
pub mod utils;
