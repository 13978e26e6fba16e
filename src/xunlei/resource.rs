use serde::Deserialize;
use serde_with::{DisplayFromStr, PickFirst, serde_as};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// A node of the resource tree returned by `drive/v1/resource/list`.
///
/// Numeric fields arrive either as JSON numbers or as decimal strings.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub name: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default)]
    pub file_size: u64,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub file_count: Option<u64>,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub file_index: Option<u64>,
    #[serde(default)]
    pub is_dir: bool,
    pub dir: Option<ResourceDir>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceDir {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Resource {
    fn children(&self) -> Option<&[Resource]> {
        match &self.dir {
            Some(dir) if self.is_dir || !dir.resources.is_empty() => Some(&dir.resources),
            None if self.is_dir => Some(&[]),
            _ => None,
        }
    }
}

/// A non-directory entry of a resource tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafFile {
    pub name: String,
    pub size: u64,
    pub index: u64,
}

/// Flatten a resource tree into its leaf files, depth first.
///
/// Leaves without an explicit `file_index` get their position in the flattened list.
#[must_use]
pub fn flatten(resources: &[Resource]) -> Vec<LeafFile> {
    fn collect<'a>(node: &'a Resource, out: &mut Vec<&'a Resource>) {
        match node.children() {
            Some(children) => children.iter().for_each(|child| collect(child, out)),
            None => out.push(node),
        }
    }

    let mut leaves = Vec::new();
    for resource in resources {
        collect(resource, &mut leaves);
    }

    leaves
        .into_iter()
        .enumerate()
        .map(|(position, leaf)| LeafFile {
            name: leaf.name.clone(),
            size: leaf.file_size,
            index: leaf.file_index.unwrap_or(position as u64),
        })
        .collect()
}

/// The leaf files chosen for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSelection {
    pub indices: Vec<u64>,
    /// Sum of the selected file sizes in bytes.
    pub total_size: u64,
    /// Number of leaf files in the whole resource.
    pub total_count: usize,
}

impl FileSelection {
    #[must_use]
    pub fn sub_file_index(&self) -> String {
        self.indices
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Keep files strictly larger than `min_size_mb` MiB. Zero keeps everything.
///
/// Returns `None` when nothing survives.
#[must_use]
pub fn select_files(leaves: &[LeafFile], min_size_mb: u64) -> Option<FileSelection> {
    let threshold = min_size_mb.saturating_mul(BYTES_PER_MB);

    let selected: Vec<&LeafFile> = leaves
        .iter()
        .filter(|leaf| min_size_mb == 0 || leaf.size > threshold)
        .collect();

    if selected.is_empty() {
        return None;
    }

    Some(FileSelection {
        indices: selected.iter().map(|leaf| leaf.index).collect(),
        total_size: selected.iter().map(|leaf| leaf.size).sum(),
        total_count: leaves.len(),
    })
}
