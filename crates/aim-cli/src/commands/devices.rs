//! List audio output devices and MIDI inputs.

use aim_io::{AudioBackend, CpalBackend, midi_port_names};

pub fn run() -> anyhow::Result<()> {
    let backend = CpalBackend::new();
    let devices = backend.list_devices()?;
    let default = backend.default_output_device()?.map(|d| d.name);

    println!("Output Devices ({})", backend.name());
    println!("==============\n");
    if devices.is_empty() {
        println!("  No output devices found.");
    }
    for (idx, device) in devices.iter().enumerate() {
        let marker = if default.as_deref() == Some(device.name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!(
            "  [{}] {} ({} Hz, {} ch){}",
            idx, device.name, device.default_sample_rate, device.channels, marker
        );
    }

    println!("\nMIDI Inputs");
    println!("===========\n");
    match midi_port_names() {
        Ok(ports) if ports.is_empty() => println!("  No MIDI inputs found."),
        Ok(ports) => {
            for (idx, port) in ports.iter().enumerate() {
                println!("  [{}] {}", idx, port);
            }
        }
        Err(e) => println!("  MIDI unavailable: {e}"),
    }

    println!();
    println!("Tip: Use a partial name with --device, or as a midi node's device:");
    println!("  aim run patch.toml --device \"USB\"");
    Ok(())
}
