use approx::assert_abs_diff_eq;

use super::*;

fn chan(lower: f64, upper: f64) -> ChannelInfo {
    ChannelInfo::new(0, 0, (lower + upper) / 2.0, upper - lower)
}

#[test]
fn test_overlap_half_covered() {
    let input = chan(0.0, 1.0);
    let output = chan(0.5, 1.5);
    assert_abs_diff_eq!(output.overlap(&input), 0.5);
    assert_abs_diff_eq!(input.overlap(&output), 0.5);
}

#[test]
fn test_overlap_containment() {
    let big = chan(0.0, 4.0);
    let small = chan(1.0, 2.0);
    assert_abs_diff_eq!(big.overlap(&small), 1.0);
    assert_abs_diff_eq!(small.overlap(&big), 0.25);
}

#[test]
fn test_overlap_disjoint() {
    let a = chan(0.0, 1.0);
    let b = chan(2.0, 3.0);
    assert_eq!(a.overlap(&b), 0.0);
    assert_eq!(b.overlap(&a), 0.0);

    // Touching edges share no bandwidth.
    let c = chan(1.0, 2.0);
    assert_eq!(a.overlap(&c), 0.0);
    assert_eq!(c.overlap(&a), 0.0);
}

#[test]
fn test_overlap_symmetry() {
    let pairs = [
        (chan(0.0, 1.0), chan(0.5, 1.5)),
        (chan(0.0, 3.0), chan(2.5, 7.0)),
        (chan(-1.0, 10.0), chan(2.0, 3.0)),
        (chan(5.0, 6.0), chan(4.0, 5.25)),
        (chan(0.0, 2.0), chan(0.0, 2.0)),
    ];
    for (a, b) in pairs {
        assert_abs_diff_eq!(
            a.overlap(&b) * b.width,
            b.overlap(&a) * a.width,
            epsilon = 1e-12
        );
    }
}

#[test]
fn test_sort_by_freq_is_stable() {
    let mut chans = vec![
        ChannelInfo::new(0, 0, 3.0, 1.0),
        ChannelInfo::new(1, 0, 1.0, 1.0),
        ChannelInfo::new(2, 0, 1.0, 1.0),
        ChannelInfo::new(3, 0, 2.0, 1.0),
    ];
    sort_by_freq(&mut chans);
    let spws: Vec<usize> = chans.iter().map(|c| c.spw_id).collect();
    assert_eq!(spws, vec![1, 2, 3, 0]);
}

#[test]
fn test_contributions_fully_inside_one_output() {
    let inputs = [ChannelInfo::new(0, 0, 1.0, 0.5)];
    let outputs = [ChannelInfo::new(0, 0, 1.0, 2.0)];
    let contribs = contributions(&inputs, &outputs);
    assert_eq!(contribs.len(), 1);
    assert_abs_diff_eq!(contribs[0].weight, 1.0);
    assert!(contribs[0].flag);
    assert_eq!(contribs[0].out_chan, 0);
}

#[test]
fn test_contributions_are_sparse() {
    let inputs: Vec<ChannelInfo> = (0..4)
        .map(|i| ChannelInfo::new(0, i, i as f64 + 0.5, 1.0))
        .collect();
    let outputs = [
        ChannelInfo::new(0, 0, 1.0, 2.0),
        ChannelInfo::new(0, 1, 3.0, 2.0),
    ];
    let contribs = contributions(&inputs, &outputs);
    // Each output channel only sees the two inputs it covers.
    assert_eq!(contribs.len(), 4);
    let out0: Vec<usize> = contribs
        .iter()
        .filter(|c| c.out_chan == 0)
        .map(|c| c.in_chan)
        .collect();
    assert_eq!(out0, vec![0, 1]);
    // Full coverage: weights sum to the output width in input channels.
    let total: f64 = contribs
        .iter()
        .filter(|c| c.out_chan == 1)
        .map(|c| c.weight)
        .sum();
    assert_abs_diff_eq!(total, 2.0);
}

#[test]
fn test_spw_info_derived_fields() {
    let info = SpwInfo::new(&[100.0, 110.0, 120.0], &[10.0, 10.0, 10.0]);
    assert_abs_diff_eq!(info.lower_bound(), 95.0);
    assert_abs_diff_eq!(info.upper_bound(), 125.0);
    assert_abs_diff_eq!(info.total_bandwidth(), 30.0);
    assert_abs_diff_eq!(info.ref_freq(), 100.0);
    assert_eq!(info.effective_bw(), info.widths());
}

#[test]
fn test_spw_info_recomputes_on_mutation() {
    let mut info = SpwInfo::new(&[100.0, 110.0, 120.0], &[10.0, 10.0, 10.0]);
    info.resize(2);
    assert_abs_diff_eq!(info.upper_bound(), 115.0);
    assert_abs_diff_eq!(info.total_bandwidth(), 20.0);

    info.resize(4);
    assert_eq!(info.freqs(), &[100.0, 110.0, 120.0, 130.0]);
    assert_abs_diff_eq!(info.upper_bound(), 135.0);

    info.reset(&[1.0], &[2.0]);
    assert_abs_diff_eq!(info.lower_bound(), 0.0);
    assert_abs_diff_eq!(info.ref_freq(), 1.0);
}

#[test]
fn test_empty_spw_info() {
    let info = SpwInfo::new(&[], &[]);
    assert_eq!(info.num_chans(), 0);
    assert_eq!(info.total_bandwidth(), 0.0);
    assert_eq!(info.upper_bound(), 0.0);
}
