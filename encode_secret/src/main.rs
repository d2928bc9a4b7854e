//! Encode Secret - Tax Rate Sync
//!
//! Prints the obfuscated form of a value for the tax_rate_sync config file
//! (credentials, endpoint paths, payload templates).
//!
//! Use `--decode` to check what an existing config value decodes to.

use clap::Parser;
use tax_rate_sync::secret::{decode, encode, PaddingStrategy};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "encode_secret")]
#[command(about = "Obfuscate a value for the tax_rate_sync configuration")]
struct Args {
    /// Plain value to encode (or obfuscated value with --decode)
    value: String,

    /// Replace base64 padding with this character instead of dropping it
    #[arg(long, value_parser = parse_sentinel)]
    sentinel: Option<char>,

    /// Decode the value instead of encoding it
    #[arg(long)]
    decode: bool,
}

fn parse_sentinel(value: &str) -> std::result::Result<char, String> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            PaddingStrategy::Sentinel(c)
                .check()
                .map_err(|e| e.to_string())?;
            Ok(c)
        }
        _ => Err("sentinel must be a single character".to_string()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let strategy = args
        .sentinel
        .map_or(PaddingStrategy::Restore, PaddingStrategy::Sentinel);

    if args.decode {
        println!("{}", decode(Some(&args.value), strategy)?);
    } else {
        println!("{}", encode(&args.value, strategy));
    }

    Ok(())
}
