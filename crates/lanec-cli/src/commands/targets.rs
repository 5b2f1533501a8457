//! `lanec targets`: list the compilation targets

use crate::{CliError, Result};
use clap::Args;
use console::style;
use itertools::Itertools;
use lanec_core::target::{known_targets, Isa, Target};
use std::str::FromStr;
use strum::IntoEnumIterator;

#[derive(Debug, Clone, Args)]
pub struct TargetsArgs {
    /// Only list targets of this ISA
    #[arg(long)]
    pub isa: Option<String>,
}

/// Render the target table, one target per line, followed by the host ISA.
pub fn render_target_table(isa: Option<Isa>) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<20} {:<10} {:>5} {:>4}  {}\n",
        "target", "isa", "width", "mask", "aliases"
    ));
    for info in known_targets()
        .into_iter()
        .filter(|info| isa.map_or(true, |isa| info.isa == isa))
    {
        out.push_str(&format!(
            "{:<20} {:<10} {:>5} {:>4}  {}\n",
            info.name,
            info.isa.to_string(),
            info.vector_width,
            info.mask_bits,
            info.aliases.iter().join(", ")
        ));
    }
    let host = match Isa::host() {
        Some(isa) => isa.to_string(),
        None => "none".to_string(),
    };
    out.push_str(&format!(
        "\nhost isa: {} (default target {})\n",
        host,
        Target::host_default_name()
    ));
    out
}

/// Execute the targets command
pub fn targets_command(args: TargetsArgs) -> Result<()> {
    let isa = args
        .isa
        .as_deref()
        .map(|name| {
            Isa::from_str(name).map_err(|_| {
                CliError::InvalidInput(format!(
                    "Unknown ISA \"{}\". Valid ISAs: {}",
                    name,
                    Isa::iter().join(", ")
                ))
            })
        })
        .transpose()?;

    let table = render_target_table(isa);
    let mut lines = table.lines();
    if let Some(header) = lines.next() {
        println!("{}", style(header).bold());
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}
