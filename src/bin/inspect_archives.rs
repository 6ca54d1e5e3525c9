use anyhow::Result;
use clap::Parser;
use csv::ReaderBuilder;
use std::path::PathBuf;
use tripstats::{
    archive::{discover_archives, extract_archive, MemberTable},
    config::Config,
    logging,
    schema::{ColumnPlan, ColumnRole, TextDecoder},
};

/// Print every tabular member of each archive and how its header maps onto
/// the canonical trip schema, without reconciling anything.
#[derive(Parser, Debug)]
struct Args {
    /// Directory holding the archives
    #[arg(default_value = "data")]
    input: PathBuf,
    #[arg(long, default_value = "*.zip")]
    pattern: String,
    /// Strict encoding label; default is UTF-8 with windows-1252 fallback
    #[arg(long)]
    encoding: Option<String>,
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let decoder = TextDecoder::from_config(&Config {
        encoding: args.encoding.clone(),
        ..Config::default()
    })?;

    for path in discover_archives(&args.input, &args.pattern)? {
        println!("=== {} ===", path.display());
        let members = match extract_archive(&path) {
            Ok(m) => m,
            Err(e) => {
                println!("  unreadable: {}", e);
                continue;
            }
        };
        for member in &members {
            describe(member, &decoder);
        }
    }
    Ok(())
}

fn describe(member: &MemberTable, decoder: &TextDecoder) {
    println!(
        "  {} ({} bytes, delimiter {:?})",
        member.name,
        member.bytes.len(),
        member.delimiter as char
    );
    let Some(text) = decoder.decode(&member.bytes) else {
        println!("    not decodable as {}", decoder.primary_name());
        return;
    };
    let mut rdr = ReaderBuilder::new()
        .delimiter(member.delimiter)
        .has_headers(false)
        .from_reader(text.as_bytes());
    let header: Vec<String> = match rdr.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        Some(Err(e)) => {
            println!("    bad header: {}", e);
            return;
        }
        None => {
            println!("    empty");
            return;
        }
    };

    match ColumnPlan::from_headers(&header) {
        Ok(plan) => {
            for (raw, role) in &plan.roles {
                match role {
                    ColumnRole::Canonical(f) => println!("    {:<40} -> {}", raw, f.name()),
                    ColumnRole::Duplicate(f) => {
                        println!("    {:<40} -> {} (duplicate, ignored)", raw, f.name())
                    }
                    ColumnRole::Passthrough(_) => println!("    {:<40}    (passthrough)", raw),
                }
            }
        }
        Err(e) => println!("    header rejected: {}", e),
    }
}
