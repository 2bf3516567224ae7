//! Turning a patch file into a network.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use aim_core::{AudioClip, Handle, Network, NodeKind, Patch};

use crate::error::ConfigError;
use crate::patch_file::{NodeConfig, ParamValue, PatchFile};
use crate::validation::{ParamKind, count, param_kind, split_reference, validate};

/// Decodes the audio file behind an `audiofile` node's `file` parameter.
pub type ClipLoader<'a> = dyn FnMut(&Path) -> Result<Arc<AudioClip>, String> + 'a;

impl PatchFile {
    /// Build the network described by this file.
    ///
    /// `audiofile` nodes with a `file` parameter need a decoder; use
    /// [`PatchFile::build_with`] for those.
    pub fn build(&self) -> Result<Network, ConfigError> {
        self.build_with(&mut |path: &Path| Err(format!("no decoder for {}", path.display())))
    }

    /// Build the network, decoding audio files with `loader`.
    ///
    /// Every node is created first and wired afterwards, so references may
    /// point at nodes declared later in the file.
    pub fn build_with(&self, loader: &mut ClipLoader<'_>) -> Result<Network, ConfigError> {
        validate(self)?;
        let patch = Patch::new();
        {
            let mut handles: BTreeMap<&str, Handle<'_>> = BTreeMap::new();
            for node in &self.nodes {
                let kind = self.node_kind(node, loader)?;
                handles.insert(node.id.as_str(), patch.insert(kind));
            }
            let ids: BTreeSet<&str> = handles.keys().copied().collect();
            for node in &self.nodes {
                let Some(&handle) = handles.get(node.id.as_str()) else {
                    continue;
                };
                for (param, value) in &node.params {
                    if param_kind(&node.node_type, param) != Some(ParamKind::Inlet) {
                        continue;
                    }
                    match value {
                        ParamValue::Number(v) => patch.set_input(handle, param, *v),
                        ParamValue::Text(reference) => {
                            let target = split_reference(&ids, reference).and_then(
                                |(id, outlet)| handles.get(id).map(|&h| (h, outlet)),
                            );
                            match target {
                                Some((source, None)) => patch.set_input(handle, param, source),
                                Some((source, Some(outlet))) => {
                                    patch.set_input(handle, param, source.port(outlet));
                                }
                                None => {
                                    return Err(ConfigError::UnresolvedReference {
                                        node: node.id.clone(),
                                        param: param.clone(),
                                        reference: reference.clone(),
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        let network = patch.finish()?;
        tracing::debug!(
            patch = %self.name,
            nodes = network.nodes().len(),
            sinks = network.terminals().len(),
            "patch built"
        );
        Ok(network)
    }

    fn node_kind(
        &self,
        node: &NodeConfig,
        loader: &mut ClipLoader<'_>,
    ) -> Result<NodeKind, ConfigError> {
        let mut kind =
            NodeKind::from_type_name(&node.node_type).ok_or_else(|| ConfigError::UnknownNodeType {
                node: node.id.clone(),
                node_type: node.node_type.clone(),
            })?;
        for (param, value) in &node.params {
            match (&mut kind, param.as_str(), value) {
                (NodeKind::Out { name, .. }, "name", ParamValue::Text(text)) => {
                    name.clone_from(text);
                }
                (NodeKind::Midi { device }, "device", ParamValue::Text(text)) => {
                    device.clone_from(text);
                }
                (NodeKind::AudioFile { clip, .. }, "file", ParamValue::Text(file)) => {
                    let path = self.resolve_path(file);
                    let loaded = loader(&path).map_err(|reason| ConfigError::LoadClip {
                        node: node.id.clone(),
                        path: path.clone(),
                        reason,
                    })?;
                    tracing::debug!(node = %node.id, path = %path.display(), frames = loaded.frames(), "audio clip loaded");
                    *clip = Some(loaded);
                }
                (
                    NodeKind::Polyphonic { max_voices, .. } | NodeKind::Unison { max_voices, .. },
                    "max_voices",
                    ParamValue::Number(n),
                ) => *max_voices = count(&node.id, param, *n)?,
                (NodeKind::Unison { voices, .. }, "voices", ParamValue::Number(n)) => {
                    *voices = count(&node.id, param, *n)?;
                }
                _ => {}
            }
        }
        Ok(kind)
    }
}
