//! Print the execution order of a patch.

use clap::Args;

use super::common::{PatchArgs, load_patch};

#[derive(Args)]
pub struct OrderArgs {
    #[command(flatten)]
    patch: PatchArgs,
}

pub fn run(args: OrderArgs) -> anyhow::Result<()> {
    let loaded = load_patch(&args.patch)?;
    // Node ids follow declaration order in the file.
    let ids: Vec<&str> = loaded.file.nodes.iter().map(|n| n.id.as_str()).collect();

    println!("Execution order for '{}'", loaded.file.name);
    for (position, &node) in loaded.order.iter().enumerate() {
        let Some(entry) = loaded.network.node(node) else {
            continue;
        };
        let id = ids.get(node.index() as usize).copied().unwrap_or("?");
        println!("  {:>3}. {:<16} {}", position + 1, id, entry.type_name());
    }

    let unreachable = ids.len().saturating_sub(loaded.order.len());
    if unreachable > 0 {
        println!("\n{unreachable} node(s) not reachable from any sink");
    }
    Ok(())
}
