use crate::core::apdu::{ApduMeta, Command};
use crate::core::error::{CodecError, CodecResult};
use crate::core::exchange::ProtocolControl;
use serde::{Deserialize, Serialize};

/// SW1 SW2 status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// `61xx`: xx more bytes can be fetched with GET RESPONSE
    pub fn bytes_available(&self) -> Option<u8> {
        (self.sw1 == 0x61).then_some(self.sw2)
    }

    /// `6Cxx`: wrong Le, xx is the exact length
    pub fn exact_length(&self) -> Option<u8> {
        (self.sw1 == 0x6C).then_some(self.sw2)
    }

    pub fn describe(&self) -> String {
        describe_status_word(self.sw1, self.sw2)
    }
}

impl std::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Get a human-readable description of SW1/SW2 status words
pub fn describe_status_word(sw1: u8, sw2: u8) -> String {
    match (sw1, sw2) {
        (0x90, 0x00) => "Success".to_string(),
        (0x61, n) => format!("Success, {n} bytes available"),
        (0x62, 0x00) => "Warning: No information given".to_string(),
        (0x62, 0x81) => "Warning: Part of returned data may be corrupted".to_string(),
        (0x62, 0x82) => "Warning: End of file reached".to_string(),
        (0x62, 0x83) => "Warning: Selected file invalidated".to_string(),
        (0x62, 0x84) => "Warning: FCI not formatted".to_string(),
        (0x63, 0x00) => "Warning: No information given".to_string(),
        (0x63, n) if n & 0xF0 == 0xC0 => format!("Warning: Counter = {}", n & 0x0F),
        (0x64, 0x00) => "Error: Execution error".to_string(),
        (0x65, 0x81) => "Error: Memory failure".to_string(),
        (0x67, 0x00) => "Error: Wrong length".to_string(),
        (0x68, 0x81) => "Error: Logical channel not supported".to_string(),
        (0x68, 0x82) => "Error: Secure messaging not supported".to_string(),
        (0x69, 0x82) => "Error: Security status not satisfied".to_string(),
        (0x69, 0x83) => "Error: Authentication method blocked".to_string(),
        (0x69, 0x84) => "Error: Referenced data invalidated".to_string(),
        (0x69, 0x85) => "Error: Conditions of use not satisfied".to_string(),
        (0x69, 0x86) => "Error: Command not allowed (no current EF)".to_string(),
        (0x6A, 0x80) => "Error: Incorrect parameters in data field".to_string(),
        (0x6A, 0x81) => "Error: Function not supported".to_string(),
        (0x6A, 0x82) => "Error: File not found".to_string(),
        (0x6A, 0x83) => "Error: Record not found".to_string(),
        (0x6A, 0x84) => "Error: Not enough memory space in file".to_string(),
        (0x6A, 0x86) => "Error: Incorrect parameters P1-P2".to_string(),
        (0x6A, 0x88) => "Error: Referenced data not found".to_string(),
        (0x6B, 0x00) => "Error: Wrong parameter(s) P1-P2".to_string(),
        (0x6C, n) => format!("Error: Wrong Le field, exact length: {n}"),
        (0x6D, 0x00) => "Error: Instruction code not supported or invalid".to_string(),
        (0x6E, 0x00) => "Error: Class not supported".to_string(),
        (0x6F, 0x00) => "Error: No precise diagnosis".to_string(),
        _ => format!("Unknown status: {sw1:02X} {sw2:02X}"),
    }
}

/// One decoded response APDU: data followed by SW1 SW2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FragmentFields")]
pub struct ResponseFragment {
    raw: Vec<u8>,
    meta: ApduMeta,
    requested_le: Option<u32>,
}

#[derive(Deserialize)]
struct FragmentFields {
    raw: Vec<u8>,
    meta: ApduMeta,
    requested_le: Option<u32>,
}

impl TryFrom<FragmentFields> for ResponseFragment {
    type Error = CodecError;

    fn try_from(fields: FragmentFields) -> CodecResult<Self> {
        let mut fragment = Self::decode(fields.raw, fields.meta)?;
        fragment.requested_le = fields.requested_le;
        Ok(fragment)
    }
}

impl ResponseFragment {
    /// Decode a raw response received under `meta`
    pub fn decode(raw: Vec<u8>, meta: ApduMeta) -> CodecResult<Self> {
        if raw.len() < 2 {
            return Err(CodecError::MalformedResponse { len: raw.len() });
        }
        Ok(Self {
            raw,
            meta,
            requested_le: None,
        })
    }

    /// Decode the response to `command`, remembering the Le it asked for
    pub fn decode_for(raw: Vec<u8>, command: &Command) -> CodecResult<Self> {
        let mut fragment = Self::decode(raw, command.meta())?;
        fragment.requested_le = command.le;
        Ok(fragment)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn meta(&self) -> ApduMeta {
        self.meta
    }

    /// Le of the command that produced this fragment
    pub fn requested_le(&self) -> Option<u32> {
        self.requested_le
    }

    pub fn sw1(&self) -> u8 {
        self.raw[self.raw.len() - 2]
    }

    pub fn sw2(&self) -> u8 {
        self.raw[self.raw.len() - 1]
    }

    pub fn status(&self) -> StatusWord {
        StatusWord::new(self.sw1(), self.sw2())
    }

    pub fn has_data(&self) -> bool {
        self.raw.len() > 2
    }

    pub fn data(&self) -> &[u8] {
        &self.raw[..self.raw.len() - 2]
    }
}

/// Ordered fragments of one logical exchange, each paired with the
/// protocol control information of the round that produced it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    fragments: Vec<ResponseFragment>,
    controls: Vec<ProtocolControl>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: ResponseFragment, control: ProtocolControl) {
        self.fragments.push(fragment);
        self.controls.push(control);
    }

    pub fn fragments(&self) -> &[ResponseFragment] {
        &self.fragments
    }

    pub fn controls(&self) -> &[ProtocolControl] {
        &self.controls
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn last(&self) -> Option<&ResponseFragment> {
        self.fragments.last()
    }

    /// Status word of the final round
    pub fn status(&self) -> Option<StatusWord> {
        self.last().map(ResponseFragment::status)
    }

    /// Data of all fragments joined in order
    pub fn data(&self) -> Vec<u8> {
        self.fragments
            .iter()
            .flat_map(|f| f.data().iter().copied())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResponseFragment, &ProtocolControl)> {
        self.fragments.iter().zip(self.controls.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::apdu::{Case, Protocol};

    fn meta() -> ApduMeta {
        ApduMeta {
            case: Case::Case2Short,
            protocol: Protocol::T1,
        }
    }

    #[test]
    fn test_status_only_response() {
        let frag = ResponseFragment::decode(vec![0x90, 0x00], meta()).unwrap();
        assert!(!frag.has_data());
        assert!(frag.data().is_empty());
        assert_eq!(frag.sw1(), 0x90);
        assert_eq!(frag.sw2(), 0x00);
        assert!(frag.status().is_success());
    }

    #[test]
    fn test_response_with_data() {
        let frag = ResponseFragment::decode(vec![0x12, 0x34, 0x6A, 0x82], meta()).unwrap();
        assert!(frag.has_data());
        assert_eq!(frag.data(), &[0x12, 0x34]);
        assert_eq!(frag.status(), StatusWord::new(0x6A, 0x82));
        assert_eq!(frag.meta(), meta());
        assert_eq!(frag.requested_le(), None);
    }

    #[test]
    fn test_short_response_is_malformed() {
        assert_eq!(
            ResponseFragment::decode(vec![0x90], meta()),
            Err(CodecError::MalformedResponse { len: 1 })
        );
        assert_eq!(
            ResponseFragment::decode(vec![], meta()),
            Err(CodecError::MalformedResponse { len: 0 })
        );
    }

    #[test]
    fn test_decode_for_keeps_requested_le() {
        let command = Command::new(0x00, 0xB0, 0x00, 0x00).with_le(5, false);
        let frag = ResponseFragment::decode_for(vec![1, 2, 3, 4, 5, 0x90, 0x00], &command).unwrap();
        assert_eq!(frag.requested_le(), Some(5));
        assert_eq!(frag.meta().case, Case::Case2Short);
    }

    #[test]
    fn test_deserialize_checks_length() {
        let short = r#"{"raw":[144],"meta":{"case":"Case1","protocol":"T1"},"requested_le":null}"#;
        let err = serde_json::from_str::<ResponseFragment>(short).unwrap_err();
        assert!(err.to_string().contains("Malformed response"));

        let command = Command::new(0x00, 0xB0, 0x00, 0x00).with_le(2, false);
        let frag = ResponseFragment::decode_for(vec![0x01, 0x02, 0x90, 0x00], &command).unwrap();
        let json = serde_json::to_string(&frag).unwrap();
        let restored: ResponseFragment = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, frag);
        assert_eq!(restored.data(), &[0x01, 0x02]);
    }

    #[test]
    fn test_response_joins_data() {
        let mut response = Response::new();
        assert!(response.is_empty());
        assert_eq!(response.status(), None);

        response.push(
            ResponseFragment::decode(vec![0x01, 0x02, 0x61, 0x02], meta()).unwrap(),
            ProtocolControl::default(),
        );
        response.push(
            ResponseFragment::decode(vec![0x03, 0x04, 0x90, 0x00], meta()).unwrap(),
            ProtocolControl::default(),
        );

        assert_eq!(response.len(), 2);
        assert_eq!(response.controls().len(), 2);
        assert_eq!(response.data(), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(response.status(), Some(StatusWord::SUCCESS));
        assert_eq!(response.iter().count(), 2);
    }

    #[test]
    fn test_status_word_helpers() {
        assert_eq!(StatusWord::new(0x61, 0x10).bytes_available(), Some(0x10));
        assert_eq!(StatusWord::new(0x90, 0x00).bytes_available(), None);
        assert_eq!(StatusWord::new(0x6C, 0x08).exact_length(), Some(0x08));
        assert_eq!(StatusWord::new(0x6A, 0x82).to_string(), "6A82");
    }

    #[test]
    fn test_describe_status_word() {
        assert_eq!(describe_status_word(0x90, 0x00), "Success");
        assert_eq!(
            describe_status_word(0x61, 0x10),
            "Success, 16 bytes available"
        );
        assert_eq!(describe_status_word(0x6A, 0x82), "Error: File not found");
        assert_eq!(
            describe_status_word(0x6C, 0x08),
            "Error: Wrong Le field, exact length: 8"
        );
        assert_eq!(describe_status_word(0x63, 0xC3), "Warning: Counter = 3");
        assert_eq!(describe_status_word(0x12, 0x34), "Unknown status: 12 34");
    }
}
