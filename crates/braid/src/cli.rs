//! Subcommands: check a schema, encode a message, decode a payload.

use anyhow::{bail, Context};
use braid_utils::{ok, parse_hex, AnyResult};
use braid_wire::{schema, CompiledProtocol, Decoder, Encoder, FieldReport};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(about, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a schema file and list its fields
    Check {
        /// Path to the TOML schema
        schema: PathBuf,
    },
    /// Encode a message and print the hex payload
    Encode {
        schema: PathBuf,
        /// Field overrides as id=value pairs
        #[clap(long = "set", value_name = "ID=VALUE")]
        sets: Vec<String>,
        /// Print the per-field report as well
        #[clap(long)]
        report: bool,
    },
    /// Decode a hex payload against a schema
    Decode {
        schema: PathBuf,
        /// Payload as hex, with or without 0x
        hex: String,
    },
}

pub fn run(args: Args) -> AnyResult {
    match args.command {
        Command::Check { schema } => check(&schema),
        Command::Encode {
            schema,
            sets,
            report,
        } => encode(&schema, &sets, report),
        Command::Decode { schema, hex } => decode(&schema, &hex),
    }
}

fn load(path: &Path) -> AnyResult<CompiledProtocol> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("couldn't read schema {}", path.display()))?;
    let proto = schema::from_toml_str(&text)
        .with_context(|| format!("couldn't parse schema {}", path.display()))?;
    Ok(proto.compile()?)
}

fn check(path: &Path) -> AnyResult {
    let proto = load(path)?;
    println!("protocol `{}` ({}): {} node(s)", proto.id, proto.name, proto.len());
    for (_, cn) in proto.nodes() {
        let kind = match cn.node.leaf_kind() {
            Some(kind) => kind.name(),
            None if cn.node.is_wire() => "padding",
            None => "container",
        };
        println!("  {:<40} {:>8}  {} bit(s)", cn.path, kind, cn.node.length_bits);
    }
    ok()
}

fn encode(path: &Path, sets: &[String], report: bool) -> AnyResult {
    let proto = load(path)?;
    let mut encoder = Encoder::new(&proto);
    for pair in sets {
        let Some((id, value)) = pair.split_once('=') else {
            bail!("override `{pair}` is not of the form id=value");
        };
        encoder.set_value(id, value);
    }

    let out = encoder.encode()?;
    println!("{}", out.hex());
    if report {
        print_report(&out.fields);
    }
    ok()
}

fn decode(path: &Path, hex: &str) -> AnyResult {
    let proto = load(path)?;
    let bytes = parse_hex(hex).context("payload is not valid hex")?;
    let decoded = Decoder::new(&proto).decode(&bytes)?;
    print_report(&decoded.fields);

    let failed = decoded
        .fields
        .iter()
        .filter(|f| f.valid == Some(false))
        .map(|f| f.id.as_str())
        .collect_vec();
    if !failed.is_empty() {
        bail!("verification failed for: {}", failed.join(", "));
    }
    ok()
}

fn print_report(fields: &[FieldReport]) {
    for field in fields {
        let Some(hex) = &field.encoded_hex else {
            continue;
        };
        let value = field
            .value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let status = match field.valid {
            Some(true) => " ok",
            Some(false) => " BAD",
            None => "",
        };
        println!(
            "  [{:>5}..{:<5}) {:<24} = {:<20} {}{}",
            field.start_bit, field.end_bit, field.id, value, hex, status
        );
    }
}
