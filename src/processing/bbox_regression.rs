// VoxelNet-style box encoding. Boxes and anchors are (x, y, z, w, l, h, yaw).
//
//   dx, dy       = (gt.xy - anchor.xy) / hypot(anchor.w, anchor.l)
//   dz           = (gt.z - anchor.z) / anchor.h
//   dw, dl, dh   = ln(gt.wlh / anchor.wlh)
//   dyaw         = (gt.yaw - anchor.yaw) mod pi, in [0, pi)

use std::f32::consts::PI;

use ndarray::ArrayView1;

use crate::pipeline::proposal_pipeline::config::BOX_DOF;

fn wrap_half_turn(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(PI);
    // rem_euclid can round up to the modulus for tiny negative inputs
    if wrapped >= PI {
        0.0
    } else {
        wrapped
    }
}

pub fn encode(gt: ArrayView1<f32>, anchor: ArrayView1<f32>) -> [f32; BOX_DOF] {
    let diagonal = anchor[3].hypot(anchor[4]);
    [
        (gt[0] - anchor[0]) / diagonal,
        (gt[1] - anchor[1]) / diagonal,
        (gt[2] - anchor[2]) / anchor[5],
        (gt[3] / anchor[3]).ln(),
        (gt[4] / anchor[4]).ln(),
        (gt[5] / anchor[5]).ln(),
        wrap_half_turn(gt[6] - anchor[6]),
    ]
}

/// Inverse of [`encode`]. The recovered yaw equals the encoded one modulo pi.
pub fn decode(deltas: ArrayView1<f32>, anchor: ArrayView1<f32>) -> [f32; BOX_DOF] {
    let diagonal = anchor[3].hypot(anchor[4]);
    [
        deltas[0] * diagonal + anchor[0],
        deltas[1] * diagonal + anchor[1],
        deltas[2] * anchor[5] + anchor[2],
        deltas[3].exp() * anchor[3],
        deltas[4].exp() * anchor[4],
        deltas[5].exp() * anchor[5],
        deltas[6] + anchor[6],
    ]
}


#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use ndarray::{array, Array1};

    use crate::processing::bbox_regression::{decode, encode};

    fn yaw_distance(a: f32, b: f32) -> f32 {
        let d = (a - b).rem_euclid(PI);
        d.min(PI - d)
    }

    #[test]
    fn test_encode() {
        let anchor = array![10.0, 2.0, -1.0, 3.0, 4.0, 1.5, 0.0];
        let gt = array![15.0, -3.0, -0.25, 3.0, 8.0, 1.5, 0.5];
        let deltas = encode(gt.view(), anchor.view());
        assert!((deltas[0] - 1.0).abs() < 1e-6);
        assert!((deltas[1] + 1.0).abs() < 1e-6);
        assert!((deltas[2] - 0.5).abs() < 1e-6);
        assert!(deltas[3].abs() < 1e-6);
        assert!((deltas[4] - 2.0f32.ln()).abs() < 1e-6);
        assert!(deltas[5].abs() < 1e-6);
        assert!((deltas[6] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_encode_wraps_yaw() {
        let anchor = array![0.0, 0.0, 0.0, 1.6, 3.9, 1.56, PI / 2.0];
        for yaw in [-3.0, -0.2, 0.0, 1.0, PI, 4.5, 7.0] {
            let gt = array![0.0, 0.0, 0.0, 1.6, 3.9, 1.56, yaw];
            let deltas = encode(gt.view(), anchor.view());
            assert!((0.0..PI).contains(&deltas[6]), "yaw {yaw} encoded as {}", deltas[6]);
            assert!(yaw_distance(deltas[6], yaw - PI / 2.0) < 1e-5);
        }
    }

    #[test]
    fn test_decode_inverts_encode() {
        let anchors = [
            array![0.2, -39.8, -1.0, 1.6, 3.9, 1.56, 0.0],
            array![35.0, 4.0, -0.6, 0.6, 0.8, 1.73, PI / 2.0],
        ];
        let boxes = [
            array![1.1, -38.5, -0.7, 1.7, 4.2, 1.49, -2.9],
            array![34.2, 4.6, -0.5, 0.55, 0.9, 1.8, 2.2],
        ];
        for anchor in &anchors {
            for gt in &boxes {
                let deltas = Array1::from(encode(gt.view(), anchor.view()).to_vec());
                let decoded = decode(deltas.view(), anchor.view());
                for i in 0..6 {
                    assert!((decoded[i] - gt[i]).abs() < 1e-4, "dof {i}: {} vs {}", decoded[i], gt[i]);
                }
                assert!(yaw_distance(decoded[6], gt[6]) < 1e-5);
            }
        }
    }
}
