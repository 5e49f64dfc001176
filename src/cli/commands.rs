use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pcsc::ShareMode;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{
    apdu::{Apdu, ApduMeta, Case, Command, Protocol},
    asn1::{to_data_object_with, BooleanRule, DecodeOptions},
    exchange::{exchange, ExchangeConfig},
    reader::PcscReader,
    response::ResponseFragment,
    tlv::parse_all,
    transcript::RecordingTransport,
    utils::{format_ascii, format_hex_dump, format_hex_spaced, parse_byte, parse_hex, parse_number},
};

#[derive(Parser)]
#[command(name = "pcsc-apdu")]
#[command(about = "ISO7816-4 APDU builder, GET RESPONSE driver and BER-TLV decoder")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available PCSC readers
    List {
        /// Show detailed information about readers
        #[arg(short = 'l', long)]
        detailed: bool,
    },

    /// Encode a command APDU from its fields
    Build {
        /// Class byte (e.g. "0x00")
        cla: String,

        /// Instruction byte (e.g. "0xA4")
        ins: String,

        /// Parameter 1
        p1: String,

        /// Parameter 2
        p2: String,

        /// Command data in hex format
        #[arg(long)]
        data: Option<String>,

        /// Expected response length (0 requests the maximum)
        #[arg(long)]
        le: Option<String>,

        /// Use extended length fields
        #[arg(short, long)]
        extended: bool,

        /// Explicit ISO7816-4 case (1, 2s, 2e, 3s, 3e, 4s, 4e)
        #[arg(short, long)]
        case: Option<Case>,
    },

    /// Split a raw response APDU into data and status
    ParseResponse {
        /// Response bytes in hex format, status word last
        response: String,

        /// Show response data in different formats
        #[arg(short, long)]
        format: Option<ResponseFormat>,
    },

    /// Decode BER-TLV data objects
    Tlv {
        /// Encoded data objects in hex format
        data: String,

        /// Only accept DER booleans (0x00 / 0xFF)
        #[arg(long)]
        der: bool,

        /// Maximum nesting depth
        #[arg(long, default_value_t = crate::core::tlv::DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },

    /// Send an APDU and follow GET RESPONSE until the final status
    Transmit {
        /// Reader name or index (use 'list' to see available readers)
        reader: String,

        /// APDU command in hex format (e.g., "00A4040000")
        apdu: String,

        /// Connection share mode
        #[arg(short, long, default_value = "shared")]
        mode: ShareModeArg,

        /// Show response in different formats
        #[arg(short, long)]
        format: Option<ResponseFormat>,

        /// Exchange settings file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Do not fetch remaining data on 61xx
        #[arg(long)]
        no_follow: bool,

        /// Write a JSON transcript of every round to this file
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[derive(Clone, Debug)]
pub enum ShareModeArg {
    Shared,
    Exclusive,
}

impl std::str::FromStr for ShareModeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(ShareModeArg::Shared),
            "exclusive" => Ok(ShareModeArg::Exclusive),
            _ => Err(format!("Invalid share mode: {s}")),
        }
    }
}

impl From<ShareModeArg> for ShareMode {
    fn from(mode: ShareModeArg) -> Self {
        match mode {
            ShareModeArg::Shared => ShareMode::Shared,
            ShareModeArg::Exclusive => ShareMode::Exclusive,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ResponseFormat {
    Hex,
    HexSpaced,
    HexDump,
    Ascii,
    All,
}

impl std::str::FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hex" => Ok(ResponseFormat::Hex),
            "spaced" => Ok(ResponseFormat::HexSpaced),
            "dump" => Ok(ResponseFormat::HexDump),
            "ascii" => Ok(ResponseFormat::Ascii),
            "all" => Ok(ResponseFormat::All),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::List { detailed } => cmd_list(detailed),
        Commands::Build {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
            extended,
            case,
        } => cmd_build(
            [cla.as_str(), ins.as_str(), p1.as_str(), p2.as_str()],
            data.as_deref(),
            le.as_deref(),
            extended,
            case,
        ),
        Commands::ParseResponse { response, format } => cmd_parse_response(&response, format),
        Commands::Tlv {
            data,
            der,
            max_depth,
        } => cmd_tlv(&data, der, max_depth),
        Commands::Transmit {
            reader,
            apdu,
            mode,
            format,
            config,
            no_follow,
            export,
        } => cmd_transmit(
            &reader,
            &apdu,
            mode,
            format,
            config.as_deref(),
            no_follow,
            export.as_deref(),
        ),
    }
}

fn cmd_list(detailed: bool) -> Result<()> {
    let reader = PcscReader::new().context("Failed to initialize PCSC")?;

    let readers = reader.list_readers().context("Failed to list readers")?;

    if readers.is_empty() {
        println!("No PCSC readers found.");
        return Ok(());
    }

    println!("Available PCSC readers:");
    for (i, reader_info) in readers.iter().enumerate() {
        match (&reader_info.atr, detailed) {
            (Some(atr), true) => {
                println!("  [{}] {}", i, reader_info.name);
                println!("      ATR: {}", format_hex_spaced(atr));
            }
            (Some(atr), false) => println!(
                "  [{}] {} [CARD - ATR: {}]",
                i,
                reader_info.name,
                format_hex_spaced(atr)
            ),
            (None, _) if reader_info.card_present => {
                println!("  [{}] {} [CARD]", i, reader_info.name)
            }
            (None, _) => println!("  [{}] {}", i, reader_info.name),
        }
    }

    Ok(())
}

fn cmd_build(
    header: [&str; 4],
    data_hex: Option<&str>,
    le: Option<&str>,
    extended: bool,
    case: Option<Case>,
) -> Result<()> {
    let [cla, ins, p1, p2] = header;
    let mut command = Command::new(
        parse_byte(cla).context("Invalid CLA")?,
        parse_byte(ins).context("Invalid INS")?,
        parse_byte(p1).context("Invalid P1")?,
        parse_byte(p2).context("Invalid P2")?,
    );

    if let Some(data_hex) = data_hex {
        let data = parse_hex(data_hex).context("Failed to parse command data")?;
        command = command.with_data(data, extended);
    }
    if let Some(le) = le {
        let le = parse_number(le).context("Invalid Le")?;
        command = command.with_le(le, extended);
    }
    if extended && command.case == Case::Case1 {
        log::warn!("Case 1 command has no length fields, --extended ignored");
    }
    if let Some(case) = case {
        command.case = case;
    }

    let expected_size = command.expected_response_size();
    let apdu = Apdu::from(command);
    let bytes = apdu.to_bytes().context("Failed to encode command")?;

    println!("APDU: {}", format_hex_spaced(&bytes));
    println!("Case: {}", apdu.meta().case);
    println!("Expected response size: {expected_size}");

    Ok(())
}

fn cmd_parse_response(response_hex: &str, format: Option<ResponseFormat>) -> Result<()> {
    let raw = parse_hex(response_hex).context("Failed to parse response hex string")?;
    let meta = ApduMeta {
        case: Case::Case1,
        protocol: Protocol::Undefined,
    };
    let fragment = ResponseFragment::decode(raw, meta).context("Failed to decode response")?;

    let format = format.unwrap_or(ResponseFormat::HexSpaced);
    print_data(fragment.data(), &format);
    print_status(&fragment);

    Ok(())
}

fn cmd_tlv(data_hex: &str, der: bool, max_depth: usize) -> Result<()> {
    let buf = parse_hex(data_hex).context("Failed to parse TLV hex string")?;
    let options = DecodeOptions {
        boolean: if der { BooleanRule::Der } else { BooleanRule::Ber },
        max_depth,
    };

    let roots = parse_all(&buf).context("Failed to parse TLV structure")?;
    for root in roots {
        let nodes = root
            .walk(options.max_depth)
            .context("Failed to parse TLV structure")?;

        for (depth, node) in nodes {
            let indent = "  ".repeat(depth);
            if node.is_constructed() {
                println!("{indent}{} len={}", node.tag(), node.len());
                continue;
            }
            match to_data_object_with(&node, &options) {
                Ok(value) => println!("{indent}{} len={}: {value}", node.tag(), node.len()),
                Err(e) => println!(
                    "{indent}{} len={}: {} ({e})",
                    node.tag(),
                    node.len(),
                    format_hex_spaced(node.content())
                ),
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ExchangeConfig> {
    let Some(path) = path else {
        return Ok(ExchangeConfig::default());
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn cmd_transmit(
    reader_name: &str,
    apdu_hex: &str,
    mode: ShareModeArg,
    format: Option<ResponseFormat>,
    config_path: Option<&Path>,
    no_follow: bool,
    export: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if no_follow {
        config.follow_more_data = false;
    }

    let apdu = parse_hex(apdu_hex).context("Failed to parse APDU hex string")?;
    let command = Command::parse(&apdu).context("Failed to parse APDU")?;

    let mut reader = PcscReader::new().context("Failed to initialize PCSC")?;
    let reader_name = reader.resolve(reader_name)?;
    reader
        .connect(&reader_name, mode.into())
        .with_context(|| format!("Failed to connect to reader: {reader_name}"))?;

    let card = reader.transport()?;
    let command = command.with_protocol(card.protocol());
    let mut transport = RecordingTransport::new(card);

    println!("APDU: {}", format_hex_spaced(&apdu));
    println!("Case: {}", command.case);

    let result = exchange(&mut transport, &command, &config);
    let (_, transcript) = transport.into_parts();

    if let Some(path) = export {
        fs::write(path, transcript.export_json()?)
            .with_context(|| format!("Failed to write transcript: {}", path.display()))?;
        println!("Transcript written to {}", path.display());
    }

    let response = result.context("Failed to execute transmit command")?;

    for (i, fragment) in response.fragments().iter().enumerate() {
        println!(
            "Round {}: {} ({})",
            i + 1,
            format_hex_spaced(fragment.raw()),
            fragment.status().describe()
        );
    }

    let format = format.unwrap_or(ResponseFormat::HexSpaced);
    print_data(&response.data(), &format);
    if let Some(last) = response.last() {
        print_status(last);
    }

    let stats = transcript.statistics();
    println!(
        "Rounds: {} ({}ms average)",
        stats.total_rounds, stats.average_duration_ms
    );

    Ok(())
}

fn print_status(fragment: &ResponseFragment) {
    println!(
        "Status: {:02X} {:02X} ({})",
        fragment.sw1(),
        fragment.sw2(),
        fragment.status().describe()
    );
}

fn print_data(data: &[u8], format: &ResponseFormat) {
    if data.is_empty() {
        println!("Response: (empty)");
        return;
    }

    match format {
        ResponseFormat::Hex => {
            println!("Response: {}", hex::encode_upper(data));
        }
        ResponseFormat::HexSpaced => {
            println!("Response: {}", format_hex_spaced(data));
        }
        ResponseFormat::HexDump => {
            println!("Response:");
            println!("{}", format_hex_dump(data));
        }
        ResponseFormat::Ascii => {
            println!("Response (ASCII): {}", format_ascii(data));
        }
        ResponseFormat::All => {
            println!("Response (Hex): {}", format_hex_spaced(data));
            println!("Response (ASCII): {}", format_ascii(data));
            if data.len() > 16 {
                println!("Response (Dump):");
                println!("{}", format_hex_dump(data));
            }
        }
    }
}
