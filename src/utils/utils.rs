use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, WriteNpyExt};
use tracing_subscriber::EnvFilter;

use crate::types::{ProposalTargets, Scene};

/// Installs the global fmt subscriber. `RUST_LOG` takes precedence over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Reads a scene from a `[N, 7]` f32 box array and an `[N]` i64 label array.
pub fn load_scene<P: AsRef<Path>, Q: AsRef<Path>>(boxes_path: P, classes_path: Q) -> Result<Scene> {
    let boxes_path = boxes_path.as_ref();
    let classes_path = classes_path.as_ref();

    let boxes: Array2<f32> = read_npy(boxes_path)
        .with_context(|| format!("failed to read boxes from {}", boxes_path.display()))?;
    let labels: Array1<i64> = read_npy(classes_path)
        .with_context(|| format!("failed to read class labels from {}", classes_path.display()))?;

    if let Some(label) = labels.iter().find(|l| **l < 0) {
        bail!("negative class label {label} in {}", classes_path.display());
    }
    Ok(Scene::new(boxes, labels.mapv(|l| l as usize)))
}

fn write_array<T: WriteNpyExt>(array: &T, path: &Path) -> Result<()> {
    let writer = BufWriter::new(
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
    );
    array
        .write_npy(writer)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Writes `g_cls.npy`, `m_cls.npy`, `g_reg.npy` and `m_reg.npy` into `dir`.
pub fn write_targets<P: AsRef<Path>>(dir: P, targets: &ProposalTargets) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    write_array(&targets.g_cls, &dir.join("g_cls.npy"))?;
    write_array(&targets.m_cls, &dir.join("m_cls.npy"))?;
    write_array(&targets.g_reg, &dir.join("g_reg.npy"))?;
    write_array(&targets.m_reg, &dir.join("m_reg.npy"))?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use ndarray::{array, Array3, Array4, Array5};
    use ndarray_npy::{read_npy, write_npy};

    use crate::types::ProposalTargets;
    use crate::utils::utils::{load_scene, write_targets};

    #[test]
    fn test_load_scene() {
        let dir = tempfile::tempdir().unwrap();
        let boxes_path = dir.path().join("boxes.npy");
        let classes_path = dir.path().join("classes.npy");
        write_npy(&boxes_path, &array![[10.0f32, 2.0, -1.0, 1.6, 3.9, 1.56, 0.3]]).unwrap();
        write_npy(&classes_path, &array![2i64]).unwrap();

        let scene = load_scene(&boxes_path, &classes_path).unwrap();
        assert_eq!(scene.num_boxes(), 1);
        assert_eq!(scene.class_idx, array![2usize]);
        assert!(scene.targets.is_none());
    }

    #[test]
    fn test_load_scene_rejects_negative_labels() {
        let dir = tempfile::tempdir().unwrap();
        let boxes_path = dir.path().join("boxes.npy");
        let classes_path = dir.path().join("classes.npy");
        write_npy(&boxes_path, &array![[10.0f32, 2.0, -1.0, 1.6, 3.9, 1.56, 0.3]]).unwrap();
        write_npy(&classes_path, &array![-1i64]).unwrap();

        assert!(load_scene(&boxes_path, &classes_path).is_err());
        assert!(load_scene(dir.path().join("missing.npy"), &classes_path).is_err());
    }

    #[test]
    fn test_write_targets() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("targets");
        let mut targets = ProposalTargets {
            g_cls: Array4::zeros((2, 1, 1, 3)),
            m_cls: Array3::from_elem((1, 1, 3), true),
            g_reg: Array5::zeros((1, 1, 1, 3, 7)),
            m_reg: Array4::from_elem((1, 1, 1, 3), false),
            ambiguous: 0,
        };
        targets.g_cls[[0, 0, 0, 1]] = 1.0;
        targets.m_reg[[0, 0, 0, 1]] = true;
        targets.g_reg[[0, 0, 0, 1, 6]] = 0.25;
        write_targets(&out, &targets).unwrap();

        let g_cls: Array4<f32> = read_npy(out.join("g_cls.npy")).unwrap();
        let m_reg: Array4<bool> = read_npy(out.join("m_reg.npy")).unwrap();
        let g_reg: Array5<f32> = read_npy(out.join("g_reg.npy")).unwrap();
        assert_eq!(g_cls, targets.g_cls);
        assert_eq!(m_reg, targets.m_reg);
        assert_eq!(g_reg, targets.g_reg);
        assert!(out.join("m_cls.npy").exists());
    }
}
