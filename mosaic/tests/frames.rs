//! Coordinate-frame and identifier properties over randomized inputs

use mosaic::frame::{reorder, reorder_named, Frame};
use mosaic::ids::{ccdid_qid_to_rcid, rcid_to_ccdid_qid, NUM_RCIDS};
use mosaic::MosaicError;
use ndarray::{array, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_array(rng: &mut ChaCha8Rng) -> Array2<f64> {
    let rows = rng.random_range(1..8);
    let cols = rng.random_range(1..8);
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-1000.0..1000.0))
}

#[test]
fn test_frame_round_trip_is_exact() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..5 {
        let x = random_array(&mut rng);
        for qid in 1..=4 {
            for from in Frame::ALL {
                for to in Frame::ALL {
                    let there = reorder(x.view(), qid, from, to);
                    assert_eq!(there.dim(), x.dim());
                    assert_eq!(reorder(there.view(), qid, to, from), x);
                }
            }
        }
    }
}

#[test]
fn test_quadrant_3_raw_to_read_flips_both_axes() {
    let x = array![[1.0, 2.0], [3.0, 4.0]];
    let read = reorder(x.view(), 3, Frame::Raw, Frame::Read);
    assert_eq!(read, array![[4.0, 3.0], [2.0, 1.0]]);
}

#[test]
fn test_raw_to_read_per_quadrant() {
    let x = array![[1.0, 2.0], [3.0, 4.0]];
    assert_eq!(reorder(x.view(), 1, Frame::Raw, Frame::Read), x);
    assert_eq!(reorder(x.view(), 2, Frame::Raw, Frame::Read), array![[2.0, 1.0], [4.0, 3.0]]);
    assert_eq!(reorder(x.view(), 4, Frame::Raw, Frame::Read), array![[3.0, 4.0], [1.0, 2.0]]);
    for qid in 1..=4 {
        assert_eq!(
            reorder(x.view(), qid, Frame::Raw, Frame::Sky),
            array![[4.0, 3.0], [2.0, 1.0]]
        );
    }
}

#[test]
fn test_unknown_frame_is_fatal() {
    let x = array![[1.0]];
    assert!(matches!(
        reorder_named(x.view(), 1, "raw", "ccd"),
        Err(MosaicError::InvalidFrame(_))
    ));
    assert_eq!(reorder_named(x.view(), 1, "RAW", "sky").unwrap(), x);
}

#[test]
fn test_rcid_bijection() {
    for rcid in 0..NUM_RCIDS {
        let (ccdid, qid) = rcid_to_ccdid_qid(rcid).unwrap();
        assert_eq!(ccdid_qid_to_rcid(ccdid, qid).unwrap(), rcid);
    }
    for ccdid in 1..=16 {
        for qid in 1..=4 {
            let rcid = ccdid_qid_to_rcid(ccdid, qid).unwrap();
            assert_eq!(rcid_to_ccdid_qid(rcid).unwrap(), (ccdid, qid));
        }
    }
    assert!(ccdid_qid_to_rcid(17, 1).is_err());
    assert!(ccdid_qid_to_rcid(1, 5).is_err());
}
