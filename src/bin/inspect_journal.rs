use journalsync::{storage::Store, ledger::LedgerView};

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "./journal_data".to_string());
    println!("🔍 Inspecting journal at '{path}'...");

    let store = Store::open(&path)?;

    match store.head_id()? {
        Some(head) => println!("📊 Head: {head}"),
        None => println!("❌ No blocks committed"),
    }

    let chain = store.chain()?;
    println!("   Chain length: {}", chain.len());
    for (height, id) in chain.iter().enumerate().rev().take(10) {
        let txns = store.block(id).map_or(0, |b| b.transaction_ids.len());
        println!("   #{height:<5} {}  ({txns} transactions)", id.short());
    }

    let pending = store.pending()?;
    println!("\n⏳ Pending transactions: {}", pending.len());
    for id in pending.iter().take(10) {
        println!("   {}", id.short());
    }

    Ok(())
}
