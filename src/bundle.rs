use anyhow::{Context, Result};
use ndarray::ArrayD;
use ndarray_npy::NpzReader;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, warn};

/// Raw arrays produced by the forensics model for one image.
///
/// Key names and shapes are not stable across model versions, so nothing here
/// interprets them; see [`crate::resolve`]. Entries keep archive order.
#[derive(Debug, Clone, Default)]
pub struct OutputBundle {
    entries: Vec<BundleEntry>,
}

#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub key: String,
    pub array: ArrayD<f32>,
}

impl OutputBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, array: ArrayD<f32>) {
        self.entries.push(BundleEntry {
            key: key.into(),
            array,
        });
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads every numeric array of an `.npz` archive, converted to f32.
    ///
    /// Entries with a non-numeric dtype (pickled objects, strings) are skipped.
    pub fn load_npz(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("open bundle: {}", path.display()))?;
        let mut npz =
            NpzReader::new(file).with_context(|| format!("read npz: {}", path.display()))?;
        let names = npz
            .names()
            .with_context(|| format!("list npz entries: {}", path.display()))?;

        let mut bundle = OutputBundle::new();
        for name in names {
            match read_as_f32(&mut npz, &name) {
                Some(array) => {
                    debug!(key = %name, shape = ?array.shape(), "bundle entry");
                    bundle.push(name, array);
                }
                None => warn!("skipping non-numeric bundle entry {name} in {}", path.display()),
            }
        }
        Ok(bundle)
    }
}

fn read_as_f32<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Option<ArrayD<f32>> {
    if let Ok(a) = npz.by_name::<ndarray::OwnedRepr<f32>, ndarray::IxDyn>(name) {
        return Some(a);
    }

    macro_rules! widen {
        ($($t:ty),*) => {
            $(
                if let Ok(a) = npz.by_name::<ndarray::OwnedRepr<$t>, ndarray::IxDyn>(name) {
                    return Some(a.mapv(|v| v as f32));
                }
            )*
        };
    }
    widen!(f64, i64, i32, i16, i8, u64, u32, u16, u8);

    if let Ok(a) = npz.by_name::<ndarray::OwnedRepr<bool>, ndarray::IxDyn>(name) {
        return Some(a.mapv(|v| if v { 1.0 } else { 0.0 }));
    }
    None
}
