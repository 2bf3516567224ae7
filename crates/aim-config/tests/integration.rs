//! Integration tests for aim-config: files on disk through to compiled programs.

use aim_config::{ConfigError, NodeConfig, PatchFile};
use aim_core::{CompileEnv, Discard, GraphError, build_graph, compile_network};
use tempfile::TempDir;

const POLY: &str = r#"
name = "two voices"

[settings]
sample_rate = 8000
frame_count = 64
outputs = ["main"]
seed = 7

[[nodes]]
id = "main"
type = "out"
input = "level"
name = "main"

[[nodes]]
id = "level"
type = "mul"
in0 = "tone"
in1 = 0.5

[[nodes]]
id = "tone"
type = "sine"
frequency = "pitch"

[[nodes]]
id = "pitch"
type = "frequency"
input = "poly.midi"

[[nodes]]
id = "poly"
type = "polyphonic"
input = "keys"
max_voices = 2

[[nodes]]
id = "keys"
type = "midi"
device = "keyboard"
"#;

#[test]
fn load_and_compile_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("poly.toml");
    std::fs::write(&path, POLY).unwrap();

    let file = PatchFile::load(&path).unwrap();
    assert_eq!(file.name, "two voices");
    assert_eq!(file.settings.sample_rate, 8000);
    assert_eq!(file.settings.outputs, vec!["main".to_string()]);
    assert_eq!(file.settings.seed, Some(7));

    let network = file.build().unwrap();
    let env = CompileEnv::new(file.settings.sample_rate, file.settings.frame_count);
    let mut program = compile_network(&network, &env).unwrap();
    let table = program.process(&mut Discard);
    // No port is registered for "keyboard", so no voices are held.
    let mix = table.mixdown(&file.settings.outputs, file.settings.frame_count);
    assert!(mix.iter().all(|s| *s == 0.0));
}

#[test]
fn save_and_reload_keeps_the_patch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("saved.toml");
    let original = PatchFile::from_toml(POLY).unwrap();
    original.save(&path).unwrap();

    let reloaded = PatchFile::load(&path).unwrap();
    assert_eq!(reloaded.name, original.name);
    assert_eq!(reloaded.settings, original.settings);
    assert_eq!(reloaded.nodes, original.nodes);
}

#[test]
fn missing_file_reports_the_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let err = PatchFile::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn cycles_surface_when_the_graph_is_built() {
    let file = PatchFile::new("cycle")
        .with_node(NodeConfig::new("a", "add").with_param("in0", "b"))
        .with_node(NodeConfig::new("b", "mul").with_param("in0", "a"))
        .with_node(NodeConfig::new("main", "out").with_param("input", "a"));
    // Construction only rejects direct self-reference.
    let network = file.build().unwrap();
    assert!(matches!(build_graph(&network), Err(GraphError::Cycle(_))));
}

#[test]
fn unresolved_references_name_the_parameter() {
    let file = PatchFile::from_toml(
        r#"
        [[nodes]]
        id = "main"
        type = "out"
        input = "missing"
        "#,
    )
    .unwrap();
    let err = file.build().unwrap_err();
    assert_eq!(
        err.to_string(),
        "node 'main' parameter 'input' refers to unknown node 'missing'"
    );
}

#[test]
fn relative_audio_files_resolve_next_to_the_patch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("player.toml");
    std::fs::write(
        &path,
        r#"
        [[nodes]]
        id = "loop"
        type = "audiofile"
        file = "loop.wav"

        [[nodes]]
        id = "main"
        type = "out"
        input = "loop"
        "#,
    )
    .unwrap();
    let file = PatchFile::load(&path).unwrap();
    let expected = dir.path().join("loop.wav");
    let err = file
        .build_with(&mut |p: &std::path::Path| Err(format!("cannot open {}", p.display())))
        .unwrap_err();
    match err {
        ConfigError::LoadClip { path, reason, .. } => {
            assert_eq!(path, expected);
            assert!(reason.starts_with("cannot open"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
