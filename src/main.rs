use anyhow::Result;
use pcsc_apdu::cli::commands::run_cli;

fn main() -> Result<()> {
    run_cli()
}
