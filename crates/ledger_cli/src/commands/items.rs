//! Local ledger commands.

use super::{open_local_store, CommandResult};
use ledger_core::{Item, LedgerDate, RecordId};
use ledger_sync_engine::{ItemUpdate, Ledger};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

fn open_ledger(dir: &Path) -> CommandResult<Ledger> {
    Ok(Ledger::new(open_local_store(dir)?))
}

fn print_item(item: &Item) {
    let status = if item.is_unsynced() { "pending" } else { "synced" };
    println!(
        "{}  {}  {:<24}  {:>10}  {}",
        item.id(),
        item.date,
        item.subject,
        item.amount,
        status
    );
}

/// Parses `YYYY-MM` into a year and month.
pub fn parse_year_month(text: &str) -> CommandResult<(i32, u32)> {
    let date = LedgerDate::parse(&format!("{text}-01"))
        .map_err(|_| format!("invalid month {text:?}, expected YYYY-MM"))?;
    Ok((date.year(), date.month()))
}

/// Runs the add command.
pub fn add(dir: &Path, subject: &str, amount: i64, date: Option<&str>) -> CommandResult {
    let date = match date {
        Some(text) => LedgerDate::parse(text)?,
        None => LedgerDate::today(),
    };
    let item = open_ledger(dir)?.create(date, subject, amount)?;
    print_item(&item);
    Ok(())
}

/// Runs the edit command.
pub fn edit(
    dir: &Path,
    id: &str,
    subject: Option<String>,
    amount: Option<i64>,
    date: Option<&str>,
) -> CommandResult {
    let update = ItemUpdate {
        date: date.map(LedgerDate::parse).transpose()?,
        subject,
        amount,
    };
    if update.is_empty() {
        return Err("nothing to change; pass --subject, --amount or --date".into());
    }
    let item = open_ledger(dir)?.update(RecordId::parse(id)?, update)?;
    print_item(&item);
    Ok(())
}

/// Runs the delete command.
pub fn delete(dir: &Path, id: &str) -> CommandResult {
    let item = open_ledger(dir)?.destroy(RecordId::parse(id)?)?;
    println!("Deleted {}", item.id());
    Ok(())
}

/// Runs the list command.
pub fn list(dir: &Path, format: &str) -> CommandResult {
    let items = open_ledger(dir)?.list();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&items)?),
        "text" => {
            for item in &items {
                print_item(item);
            }
            println!("{} item(s)", items.len());
        }
        other => return Err(format!("unknown format {other:?}").into()),
    }
    Ok(())
}

/// Runs the month command.
pub fn month(dir: &Path, month: Option<&str>) -> CommandResult {
    let ledger = open_ledger(dir)?;
    match month {
        Some(text) => {
            let (year, month) = parse_year_month(text)?;
            let summary = ledger.month(year, month);
            println!("{year:04}-{month:02}");
            for item in &summary.items {
                print_item(item);
            }
            println!("Total: {}", summary.total);
        }
        None => {
            for ym in ledger.year_months() {
                println!("{:04}-{:02}", ym.year(), ym.month());
            }
        }
    }
    Ok(())
}

/// Runs the export command.
pub fn export(dir: &Path, output: Option<&Path>) -> CommandResult {
    let ledger = open_ledger(dir)?;
    let rows = match output {
        Some(path) => ledger.export_csv(BufWriter::new(File::create(path)?))?,
        None => ledger.export_csv(io::stdout().lock())?,
    };
    if let Some(path) = output {
        eprintln!("Wrote {rows} row(s) to {}", path.display());
    }
    Ok(())
}
