use crate::core::error::{CodecError, CodecResult};
use crate::core::response::ResponseFragment;
use serde::{Deserialize, Serialize};

/// Instruction byte of GET RESPONSE (ISO7816-4 §7.6.1)
pub const INS_GET_RESPONSE: u8 = 0xC0;

/// Size of the CLA INS P1 P2 header
pub const HEADER_LEN: usize = 4;

/// Largest data field of a short command
pub const MAX_SHORT_DATA: usize = 255;

/// Largest data field of an extended command
pub const MAX_EXTENDED_DATA: usize = 65535;

/// Largest Le of a short command (encoded as 0x00)
pub const MAX_SHORT_LE: u32 = 256;

/// Largest Le of an extended command (encoded as 0x0000)
pub const MAX_EXTENDED_LE: u32 = 65536;

/// ISO7816-4 command case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Case {
    Case1,
    Case2Short,
    Case2Extended,
    Case3Short,
    Case3Extended,
    Case4Short,
    Case4Extended,
}

/// Width of the Lc/Le fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthForm {
    None,
    Short,
    Extended,
}

/// Structural rule of a case: which body fields exist and how wide they are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseRule {
    pub has_data: bool,
    pub has_le: bool,
    pub form: LengthForm,
}

impl Case {
    pub const ALL: [Case; 7] = [
        Case::Case1,
        Case::Case2Short,
        Case::Case2Extended,
        Case::Case3Short,
        Case::Case3Extended,
        Case::Case4Short,
        Case::Case4Extended,
    ];

    /// Look up the case table entry
    pub const fn rule(self) -> CaseRule {
        let (has_data, has_le, form) = match self {
            Case::Case1 => (false, false, LengthForm::None),
            Case::Case2Short => (false, true, LengthForm::Short),
            Case::Case2Extended => (false, true, LengthForm::Extended),
            Case::Case3Short => (true, false, LengthForm::Short),
            Case::Case3Extended => (true, false, LengthForm::Extended),
            Case::Case4Short => (true, true, LengthForm::Short),
            Case::Case4Extended => (true, true, LengthForm::Extended),
        };
        CaseRule {
            has_data,
            has_le,
            form,
        }
    }

    pub fn is_extended(self) -> bool {
        self.rule().form == LengthForm::Extended
    }

    /// Maximum data field length allowed by this case
    pub fn max_data_len(self) -> usize {
        let rule = self.rule();
        match (rule.has_data, rule.form) {
            (false, _) => 0,
            (true, LengthForm::Extended) => MAX_EXTENDED_DATA,
            (true, _) => MAX_SHORT_DATA,
        }
    }

    /// Maximum Le allowed by this case, `None` if the case carries no Le
    pub fn max_le(self) -> Option<u32> {
        let rule = self.rule();
        match (rule.has_le, rule.form) {
            (false, _) => None,
            (true, LengthForm::Extended) => Some(MAX_EXTENDED_LE),
            (true, _) => Some(MAX_SHORT_LE),
        }
    }

    /// The case with an Le field and the same length form.
    /// Cases that already carry Le map to themselves.
    pub fn with_le_field(self) -> Case {
        match self {
            Case::Case1 => Case::Case2Short,
            Case::Case3Short => Case::Case4Short,
            Case::Case3Extended => Case::Case4Extended,
            other => other,
        }
    }
}

impl std::fmt::Display for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Case::Case1 => "case 1",
            Case::Case2Short => "case 2 short",
            Case::Case2Extended => "case 2 extended",
            Case::Case3Short => "case 3 short",
            Case::Case3Extended => "case 3 extended",
            Case::Case4Short => "case 4 short",
            Case::Case4Extended => "case 4 extended",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Case {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', ' '], "-").as_str() {
            "1" | "case1" | "case-1" => Ok(Case::Case1),
            "2s" | "case2-short" | "case-2-short" => Ok(Case::Case2Short),
            "2e" | "case2-extended" | "case-2-extended" => Ok(Case::Case2Extended),
            "3s" | "case3-short" | "case-3-short" => Ok(Case::Case3Short),
            "3e" | "case3-extended" | "case-3-extended" => Ok(Case::Case3Extended),
            "4s" | "case4-short" | "case-4-short" => Ok(Case::Case4Short),
            "4e" | "case4-extended" | "case-4-extended" => Ok(Case::Case4Extended),
            _ => Err(format!("Invalid case: {s}")),
        }
    }
}

/// Transmission protocol tag. Carried with APDUs but never interpreted by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    T0,
    T1,
    Raw,
    #[default]
    Undefined,
}

/// Metadata shared by command and response APDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApduMeta {
    pub case: Case,
    pub protocol: Protocol,
}

/// A command APDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Option<Vec<u8>>,
    /// Expected response length. 0 requests the maximum for the case.
    pub le: Option<u32>,
    pub case: Case,
    pub protocol: Protocol,
}

impl Command {
    /// Header-only (case 1) command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
            case: Case::Case1,
            protocol: Protocol::Undefined,
        }
    }

    /// Attach a data field, switching to the matching case 3/4 variant.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>, extended: bool) -> Self {
        self.data = Some(data.into());
        self.case = match (self.le.is_some(), extended) {
            (false, false) => Case::Case3Short,
            (false, true) => Case::Case3Extended,
            (true, false) => Case::Case4Short,
            (true, true) => Case::Case4Extended,
        };
        self
    }

    /// Attach an expected length, switching to the matching case 2/4 variant.
    pub fn with_le(mut self, le: u32, extended: bool) -> Self {
        self.le = Some(le);
        self.case = match (self.data.is_some(), extended) {
            (false, false) => Case::Case2Short,
            (false, true) => Case::Case2Extended,
            (true, false) => Case::Case4Short,
            (true, true) => Case::Case4Extended,
        };
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Copy of this command asking for `le` bytes, keeping its length form.
    /// A command without an Le field gains one.
    pub fn with_expected_length(&self, le: u32) -> Self {
        Self {
            le: Some(le),
            case: self.case.with_le_field(),
            ..self.clone()
        }
    }

    /// GET RESPONSE for `available` bytes as signalled by `61xx`
    pub fn get_response(cla: u8, ins: u8, available: u8, protocol: Protocol) -> Self {
        Self {
            cla,
            ins,
            p1: 0x00,
            p2: 0x00,
            data: None,
            le: Some(u32::from(available)),
            case: Case::Case2Short,
            protocol,
        }
    }

    pub fn meta(&self) -> ApduMeta {
        ApduMeta {
            case: self.case,
            protocol: self.protocol,
        }
    }

    /// Receive buffer size needed for the response: Le (0 meaning the case
    /// maximum) plus the two status bytes.
    pub fn expected_response_size(&self) -> usize {
        let le = match (self.le, self.case.max_le()) {
            (Some(0), Some(max)) => max,
            (Some(le), _) => le,
            (None, _) => 0,
        };
        le as usize + 2
    }

    fn validate(&self) -> CodecResult<()> {
        let rule = self.case.rule();
        let data_len = self.data.as_ref().map_or(0, Vec::len);

        if rule.has_data {
            if data_len == 0 {
                return Err(CodecError::InvalidCommand(format!(
                    "{} requires a non-empty data field",
                    self.case
                )));
            }
            if data_len > self.case.max_data_len() {
                return Err(CodecError::InvalidCommand(format!(
                    "data length {} exceeds {} maximum of {}",
                    data_len,
                    self.case,
                    self.case.max_data_len()
                )));
            }
        } else if data_len != 0 {
            return Err(CodecError::InvalidCommand(format!(
                "{} cannot carry a data field",
                self.case
            )));
        }

        match (self.le, self.case.max_le()) {
            (Some(le), Some(max)) if le > max => Err(CodecError::InvalidCommand(format!(
                "Le {} exceeds {} maximum of {}",
                le, self.case, max
            ))),
            (Some(_), Some(_)) | (None, None) => Ok(()),
            (None, Some(_)) => Err(CodecError::InvalidCommand(format!(
                "{} requires an Le field",
                self.case
            ))),
            (Some(_), None) => Err(CodecError::InvalidCommand(format!(
                "{} cannot carry an Le field",
                self.case
            ))),
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        self.validate()?;

        let rule = self.case.rule();
        let data = self.data.as_deref().unwrap_or(&[]);
        let mut out = Vec::with_capacity(HEADER_LEN + 3 + data.len() + 3);
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);

        if rule.has_data {
            match rule.form {
                LengthForm::Extended => {
                    out.push(0x00);
                    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
                }
                _ => out.push(data.len() as u8),
            }
            out.extend_from_slice(data);
        }

        if let Some(le) = self.le {
            match rule.form {
                LengthForm::Extended => {
                    // Lc already carried the 0x00 marker in case 4
                    if !rule.has_data {
                        out.push(0x00);
                    }
                    // 65536 wraps to 0x0000
                    out.extend_from_slice(&(le as u16).to_be_bytes());
                }
                _ => out.push(le as u8),
            }
        }

        Ok(out)
    }

    /// Recover a command and its case from raw command APDU bytes
    pub fn parse(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::InvalidCommand(format!(
                "command must be at least {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }

        let mut cmd = Command::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let body = &bytes[HEADER_LEN..];
        let inconsistent = || {
            CodecError::InvalidCommand(format!(
                "body of {} bytes is inconsistent with its length fields",
                body.len()
            ))
        };

        match body {
            [] => {}
            [le] => {
                cmd.le = Some(u32::from(*le));
                cmd.case = Case::Case2Short;
            }
            [lc, rest @ ..] if *lc != 0 => {
                let lc = usize::from(*lc);
                if rest.len() == lc {
                    cmd.case = Case::Case3Short;
                } else if rest.len() == lc + 1 {
                    cmd.le = Some(u32::from(rest[lc]));
                    cmd.case = Case::Case4Short;
                } else {
                    return Err(inconsistent());
                }
                cmd.data = Some(rest[..lc].to_vec());
            }
            [0x00, hi, lo] => {
                cmd.le = Some(u32::from(u16::from_be_bytes([*hi, *lo])));
                cmd.case = Case::Case2Extended;
            }
            [0x00, hi, lo, rest @ ..] => {
                let lc = usize::from(u16::from_be_bytes([*hi, *lo]));
                if lc == 0 {
                    return Err(inconsistent());
                }
                if rest.len() == lc {
                    cmd.case = Case::Case3Extended;
                } else if rest.len() == lc + 2 {
                    cmd.le = Some(u32::from(u16::from_be_bytes([rest[lc], rest[lc + 1]])));
                    cmd.case = Case::Case4Extended;
                } else {
                    return Err(inconsistent());
                }
                cmd.data = Some(rest[..lc].to_vec());
            }
            _ => return Err(inconsistent()),
        }

        Ok(cmd)
    }
}

/// Either side of an APDU exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apdu {
    Command(Command),
    Response(ResponseFragment),
}

impl Apdu {
    pub fn meta(&self) -> ApduMeta {
        match self {
            Apdu::Command(cmd) => cmd.meta(),
            Apdu::Response(frag) => frag.meta(),
        }
    }

    /// Wire bytes of this APDU
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        match self {
            Apdu::Command(cmd) => cmd.encode(),
            Apdu::Response(frag) => Ok(frag.raw().to_vec()),
        }
    }
}

impl From<Command> for Apdu {
    fn from(cmd: Command) -> Self {
        Apdu::Command(cmd)
    }
}

impl From<ResponseFragment> for Apdu {
    fn from(frag: ResponseFragment) -> Self {
        Apdu::Response(frag)
    }
}
