//! List node types with their inlets and outlets.

use aim_core::{DataType, Input, NodeKind, TYPE_NAMES};

fn describe_default(input: &Input) -> String {
    match input {
        Input::Unset => "unset".to_string(),
        Input::Number(v) => format!("{v}"),
        Input::Outlet(_) => "connected".to_string(),
    }
}

fn describe_type(data: DataType) -> &'static str {
    match data {
        DataType::Signal => "signal",
        DataType::Midi => "midi",
        DataType::None => "follows input",
    }
}

pub fn run() -> anyhow::Result<()> {
    println!("Available Node Types");
    println!("====================\n");

    for &name in TYPE_NAMES {
        let Some(kind) = NodeKind::from_type_name(name) else {
            continue;
        };
        println!("  {name}");
        for (inlet, default) in kind.inlets() {
            println!("      in  {:<14} default {}", inlet, describe_default(default));
        }
        match &kind {
            NodeKind::Out { .. } => println!("      par {:<14} sink name", "name"),
            NodeKind::Midi { device } => {
                println!("      par {:<14} default {}", "device", device);
            }
            NodeKind::AudioFile { .. } => println!("      par {:<14} WAV path", "file"),
            NodeKind::Polyphonic { max_voices, .. } => {
                println!("      par {:<14} default {}", "max_voices", max_voices);
            }
            NodeKind::Unison {
                voices, max_voices, ..
            } => {
                println!("      par {:<14} default {}", "voices", voices);
                println!("      par {:<14} default {}", "max_voices", max_voices);
            }
            _ => {}
        }
        for (outlet, data) in kind.outlets() {
            println!("      out {:<14} {}", outlet, describe_type(*data));
        }
    }

    println!("\nTotal: {} node types", TYPE_NAMES.len());
    Ok(())
}
