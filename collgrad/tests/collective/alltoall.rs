use collgrad::autograd::{GradCollectives, Tape};
use collgrad::{CollError, Tensor};

use super::helpers::{collect_ranks, run_ranks};

#[test]
fn test_alltoall_single_rank_keeps_shape() {
    run_ranks(1, |client| {
        let t = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();
        let out = client.alltoall(&t, None, None).unwrap();
        assert_eq!(out.shape().unwrap(), vec![3, 2]);
        assert_eq!(out.to_vec::<f32>().unwrap(), t.to_vec::<f32>().unwrap());
    });
}

#[test]
fn test_alltoall_equal_split() {
    let outs = collect_ranks(2, |client| {
        let base = client.rank() as i32 * 10;
        let t = Tensor::vector(&[base, base + 1, base + 2, base + 3]);
        client.alltoall(&t, None, None).unwrap().to_vec::<i32>().unwrap()
    });
    assert_eq!(outs[0], vec![0, 1, 10, 11]);
    assert_eq!(outs[1], vec![2, 3, 12, 13]);
}

#[test]
fn test_alltoall_explicit_splits() {
    let outs = collect_ranks(2, |client| {
        let (base, splits) = match client.rank() {
            0 => (0, [1, 2]),
            _ => (10, [2, 1]),
        };
        let t = Tensor::vector(&[base as f32, base as f32 + 1.0, base as f32 + 2.0]);
        let out = client.alltoall(&t, Some(&splits), Some("route")).unwrap();
        out.to_vec::<f32>().unwrap()
    });
    assert_eq!(outs[0], vec![0.0, 10.0, 11.0]);
    assert_eq!(outs[1], vec![1.0, 2.0, 12.0]);
}

#[test]
fn test_alltoall_rejects_bad_splits() {
    run_ranks(2, |client| {
        let t = Tensor::vector(&[1.0f32, 2.0, 3.0]);
        for splits in [&[1, 1][..], &[4, -1][..], &[3][..]] {
            let err = client.alltoall(&t, Some(splits), None).unwrap_err();
            assert!(matches!(err, CollError::InvalidSplits { rows: 3, .. }), "{err}");
        }
        assert_eq!(client.pending().unwrap(), 0);
    });
}

#[test]
fn test_alltoall_backward_routes_rows_home() {
    // Sending the output straight back as the gradient must reproduce each
    // rank's own input rows.
    let results = collect_ranks(3, |client| {
        let r = client.rank() as f64;
        let splits: Vec<i32> = match client.rank() {
            0 => vec![2, 0, 1],
            1 => vec![1, 1, 1],
            _ => vec![0, 2, 2],
        };
        let rows = splits.iter().sum::<i32>() as usize;
        let values: Vec<f64> = (0..rows).map(|i| r * 100.0 + i as f64).collect();
        let x = Tensor::vector(&values);

        let tape = Tape::new();
        let y = GradCollectives::new(client, &tape)
            .alltoall(&x, Some(&splits), None)
            .unwrap();
        let seed = y.deep_clone().unwrap();
        let grads = tape.backward(client, &[(y, seed)]).unwrap();
        (values, grads.get(&x).unwrap().to_vec::<f64>().unwrap())
    });

    for (rank, (input, grad)) in results.iter().enumerate() {
        assert_eq!(grad, input, "rank {rank} gradient rows misrouted");
    }
}
