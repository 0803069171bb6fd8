//! The clean pathway: removing a node's output files (and, for backends
//! that require sandbox symlinks, the pre-translation originals and the
//! symlinks themselves). Shared by `-c` clean mode and recovery repair.

use tracing::{info, warn};

use crate::dag::{Graph, NodeId};
use crate::translate::FilenameTranslator;

fn file_clean(filename: &str, silent: bool) {
    match std::fs::remove_file(filename) {
        Ok(()) => {
            if !silent {
                info!(file = filename, "deleted");
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            if !silent {
                warn!(file = filename, error = %e, "couldn't delete");
            }
        }
    }
}

/// Remove one node's declared target files (and their pre-translation
/// originals, if a translator is in play), and drop them from
/// `completedFiles`.
pub fn clean_node_targets(graph: &mut Graph, translator: Option<&FilenameTranslator>, node_id: NodeId, silent: bool) {
    let targets = graph.node(node_id).targets.clone();
    for t in &targets {
        file_clean(t, silent);
        if let Some(original) = translator.and_then(|tr| tr.reverse_lookup(t)) {
            file_clean(original, silent);
        }
        graph.unmark_file_completed(t);
    }
}

/// `-c`: clean every node's targets, then (for backends that sandbox
/// files) unlink every translation symlink.
pub fn clean_dag(graph: &mut Graph, translator: &FilenameTranslator, unlink_symlinks: bool, silent: bool) {
    for id in graph.ids().collect::<Vec<_>>() {
        clean_node_targets(graph, Some(translator), id, silent);
    }
    if unlink_symlinks {
        translator.unlink_all(silent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clean_removes_target_file_and_clears_completed_entry() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, b"hi").unwrap();

        let mut graph = Graph::new(1, 1);
        let target_str = target.to_string_lossy().to_string();
        let id = graph.add_node(1, "touch out".into(), false, vec![], vec![target_str.clone()]).unwrap();
        graph.mark_file_completed(target_str.clone());

        clean_node_targets(&mut graph, None, id, true);

        assert!(!target.exists());
        assert!(!graph.is_file_completed(&target_str));
    }

    #[test]
    fn clean_is_idempotent_on_already_missing_files() {
        let mut graph = Graph::new(1, 1);
        let id = graph.add_node(1, "touch out".into(), false, vec![], vec!["/no/such/file".into()]).unwrap();
        clean_node_targets(&mut graph, None, id, true);
        clean_node_targets(&mut graph, None, id, true);
    }
}
