use approx::{assert_abs_diff_eq, assert_relative_eq};
use hifitime::Epoch;
use marlu::RADec;

use super::*;

fn window(name: &str, start: f64, step: f64, n: usize) -> SpectralWindow {
    SpectralWindow::new(
        name,
        (0..n).map(|i| start + step * i as f64).collect(),
        vec![step; n],
        FreqFrame::Topo,
    )
}

fn opts<'a>() -> PlanOptions<'a> {
    PlanOptions {
        combine_spws: false,
        chanbin: None,
        hanning: false,
        regrid: None,
        nspws: 1,
        frames: &IdentityFrames,
        ref_time: Epoch::from_mjd_utc(59000.0),
        direction: RADec { ra: 0.0, dec: 0.0 },
    }
}

#[test]
fn test_plan_copy() {
    let spw = window("A", 100.0, 100.0, 8);
    let planned = plan(&[SelectedSpw::all_channels(0, &spw)], &opts()).unwrap();
    assert_eq!(planned.outputs.len(), 1);
    let out = &planned.outputs[0];
    assert_eq!(out.inputs[0].pipeline, StripePipeline::Copy);
    assert_eq!(out.grid.freqs(), spw.freqs.as_slice());
    assert_eq!(out.inputs[0].keep, (0..8).collect::<Vec<_>>());
    for c in &out.contributions {
        assert_abs_diff_eq!(c.weight, 1.0);
    }
    assert!(!out.converts_frame());
    assert_eq!(out.ref_doppler, 1.0);
}

#[test]
fn test_plan_chanbin() {
    let spw = window("A", 100.0, 100.0, 8);
    let chanbin = ChanBin::Uniform(2);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            chanbin: Some(&chanbin),
            ..opts()
        },
    )
    .unwrap();
    let out = &planned.outputs[0];
    assert_eq!(out.inputs[0].pipeline, StripePipeline::Average { width: 2 });
    assert_eq!(out.grid.freqs(), &[150.0, 350.0, 550.0, 750.0]);
    assert_eq!(out.grid.widths(), &[200.0; 4]);
    assert_abs_diff_eq!(out.grid.total_bandwidth(), 800.0);
}

#[test]
fn test_plan_chanbin_short_tail() {
    let spw = window("A", 100.0, 100.0, 8);
    let chanbin = ChanBin::Uniform(3);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            chanbin: Some(&chanbin),
            ..opts()
        },
    )
    .unwrap();
    let grid = &planned.outputs[0].grid;
    assert_eq!(grid.freqs(), &[200.0, 500.0, 750.0]);
    assert_eq!(grid.widths(), &[300.0, 300.0, 200.0]);
}

#[test]
fn test_chanbin_of_one_is_a_copy() {
    let spw = window("A", 100.0, 100.0, 8);
    let chanbin = ChanBin::Uniform(1);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            chanbin: Some(&chanbin),
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(planned.outputs[0].inputs[0].pipeline, StripePipeline::Copy);
    assert_eq!(planned.outputs[0].grid.num_chans(), 8);
}

#[test]
fn test_chanbin_count_mismatch() {
    let a = window("A", 100.0, 100.0, 8);
    let b = window("B", 1000.0, 100.0, 8);
    let chanbin = ChanBin::PerSpw(vec![2]);
    let result = plan(
        &[SelectedSpw::all_channels(0, &a), SelectedSpw::all_channels(1, &b)],
        &PlanOptions {
            chanbin: Some(&chanbin),
            ..opts()
        },
    );
    assert!(matches!(
        result,
        Err(ConfigError::ChanbinCount {
            expected: 2,
            got: 1
        })
    ));
}

#[test]
fn test_descending_window_bins_in_input_order() {
    let spw = SpectralWindow::new(
        "A",
        (0..5).map(|i| 1000.0 - 100.0 * i as f64).collect(),
        vec![-100.0; 5],
        FreqFrame::Topo,
    );
    let chanbin = ChanBin::Uniform(2);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            chanbin: Some(&chanbin),
            ..opts()
        },
    )
    .unwrap();
    let out = &planned.outputs[0];
    assert_eq!(out.inputs[0].keep, vec![0, 1, 2, 3, 4]);
    assert_eq!(out.grid.freqs(), &[950.0, 750.0, 600.0]);
    assert_eq!(out.grid.widths(), &[-200.0, -200.0, -100.0]);
    assert_abs_diff_eq!(out.grid.total_bandwidth(), 500.0);
}

#[test]
fn test_descending_window_copy_stays_descending() {
    let spw = SpectralWindow::new(
        "A",
        (0..4).rev().map(|i| 100.0 + 100.0 * i as f64).collect(),
        vec![-100.0; 4],
        FreqFrame::Topo,
    );
    let planned = plan(&[SelectedSpw::all_channels(0, &spw)], &opts()).unwrap();
    let out = &planned.outputs[0];
    assert_eq!(out.inputs[0].pipeline, StripePipeline::Copy);
    assert_eq!(out.inputs[0].keep, vec![0, 1, 2, 3]);
    assert_eq!(out.grid.freqs(), &[400.0, 300.0, 200.0, 100.0]);
    assert_eq!(out.grid.widths(), &[-100.0; 4]);
}

#[test]
fn test_zero_width_channels_are_dropped() {
    let mut spw = window("A", 100.0, 100.0, 4);
    spw.widths[1] = 0.0;
    let planned = plan(&[SelectedSpw::all_channels(0, &spw)], &opts()).unwrap();
    assert_eq!(planned.outputs[0].inputs[0].keep, vec![0, 2, 3]);
    assert_eq!(planned.outputs[0].grid.num_chans(), 3);
}

#[test]
fn test_channel_selection_offsets() {
    let spw = window("A", 100.0, 100.0, 8);
    let sel = SelectedSpw {
        spw: 0,
        window: &spw,
        chans: 2..6,
    };
    let planned = plan(&[sel.clone()], &opts()).unwrap();
    let out = &planned.outputs[0];
    assert_eq!(out.inputs[0].chans, sel.chans);
    assert_eq!(out.inputs[0].keep, vec![0, 1, 2, 3]);
    assert_eq!(out.grid.freqs(), &[300.0, 400.0, 500.0, 600.0]);
}

#[test]
fn test_combine_disjoint_windows() {
    let a = window("A", 100.0, 100.0, 4);
    let b = window("B", 500.0, 100.0, 4);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &a), SelectedSpw::all_channels(1, &b)],
        &PlanOptions {
            combine_spws: true,
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(planned.outputs.len(), 1);
    let out = &planned.outputs[0];
    assert_eq!(out.name, "A");
    assert_eq!(out.grid.num_chans(), 8);
    let combination = out.combination.as_ref().unwrap();
    assert_eq!(combination.contributions.len(), 8);
    for (i, c) in combination.contributions.iter().enumerate() {
        assert_eq!(c.out_chan, i);
        assert_eq!(c.in_spw, if i < 4 { 0 } else { 1 });
        assert_abs_diff_eq!(c.weight, 1.0);
    }
    assert_eq!(planned.find_input(1), Some((0, 1)));
    assert_eq!(planned.find_input(2), None);
}

#[test]
fn test_combine_overlapping_windows() {
    let a = window("A", 100.0, 100.0, 4);
    let b = window("B", 300.0, 100.0, 4);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &a), SelectedSpw::all_channels(1, &b)],
        &PlanOptions {
            combine_spws: true,
            ..opts()
        },
    )
    .unwrap();
    let out = &planned.outputs[0];
    assert_eq!(
        out.grid.freqs(),
        &[100.0, 200.0, 300.0, 400.0, 500.0, 600.0]
    );
    // Both windows feed the shared channels.
    let shared: Vec<_> = out
        .combination
        .as_ref()
        .unwrap()
        .contributions
        .iter()
        .filter(|c| c.out_chan == 2)
        .map(|c| c.in_spw)
        .collect();
    assert_eq!(shared, vec![0, 1]);
}

#[test]
fn test_combine_drops_short_bins_of_differing_widths() {
    let a = window("A", 1000.0, 100.0, 5);
    let b = window("B", 2000.0, 50.0, 4);
    let chanbin = ChanBin::Uniform(2);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &a), SelectedSpw::all_channels(1, &b)],
        &PlanOptions {
            combine_spws: true,
            chanbin: Some(&chanbin),
            ..opts()
        },
    )
    .unwrap();
    let out = &planned.outputs[0];
    assert_eq!(out.grid.freqs(), &[1050.0, 1250.0, 2025.0, 2125.0]);
    assert_eq!(out.grid.widths(), &[200.0, 200.0, 100.0, 100.0]);
}

#[test]
fn test_regrid_channel_mode() {
    let spw = window("A", 100.0, 100.0, 8);
    let spec = RegridSpec {
        start: Some(2.0),
        width: Some(2.0),
        ..Default::default()
    };
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            regrid: Some(&spec),
            ..opts()
        },
    )
    .unwrap();
    let out = &planned.outputs[0];
    assert_eq!(out.grid.freqs(), &[350.0, 550.0, 750.0]);
    assert_eq!(out.grid.widths(), &[200.0; 3]);
    assert!(out.inputs[0].pipeline.regridder().is_some());
    assert_eq!(out.inputs[0].pipeline.output_len(8), 3);
}

#[test]
fn test_regrid_frequency_mode() {
    let spw = window("A", 100.0, 100.0, 8);
    let spec = RegridSpec {
        mode: RegridMode::Frequency,
        start: Some(150.0),
        width: Some(200.0),
        nchan: 2,
        ..Default::default()
    };
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            regrid: Some(&spec),
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(planned.outputs[0].grid.freqs(), &[150.0, 350.0]);

    // Without nchan, as many channels as fit.
    let spec = RegridSpec {
        mode: RegridMode::Frequency,
        width: Some(200.0),
        ..Default::default()
    };
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            regrid: Some(&spec),
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(planned.outputs[0].grid.freqs(), &[150.0, 350.0, 550.0, 750.0]);
}

#[test]
fn test_regrid_velocity_mode() {
    let rest = 1.0e9;
    let spw = window("A", 0.999e9, 1e5, 20);
    let spec = RegridSpec {
        mode: RegridMode::Velocity,
        restfreq: Some(rest),
        width: Some(60.0),
        nchan: 5,
        ..Default::default()
    };
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            regrid: Some(&spec),
            ..opts()
        },
    )
    .unwrap();
    let grid = &planned.outputs[0].grid;
    assert_eq!(grid.num_chans(), 5);
    // Radio velocities map linearly onto frequency.
    let width = rest * 60.0 / VEL_C;
    for w in grid.widths() {
        assert_relative_eq!(*w, width, max_relative = 1e-6);
    }
    assert!(grid.freqs().windows(2).all(|f| f[1] > f[0]));

    let spec = RegridSpec {
        mode: RegridMode::Velocity,
        ..Default::default()
    };
    let result = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            regrid: Some(&spec),
            ..opts()
        },
    );
    assert!(matches!(result, Err(ConfigError::MissingRestFreq)));
}

#[test]
fn test_undefined_frame_conversion() {
    let spw = window("A", 100.0, 100.0, 8);
    let spec = RegridSpec {
        outframe: Some(FreqFrame::Lsrk),
        ..Default::default()
    };
    let result = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            regrid: Some(&spec),
            ..opts()
        },
    );
    assert!(matches!(
        result,
        Err(ConfigError::UndefinedFrameConversion {
            from: FreqFrame::Topo,
            to: FreqFrame::Lsrk
        })
    ));
}

#[test]
fn test_frame_conversion_scales_grid() {
    let spw = window("A", 1e9, 1e6, 8);
    let epoch = Epoch::from_mjd_utc(59000.0);
    let frames = RadialVelocity {
        from: FreqFrame::Topo,
        to: FreqFrame::Lsrk,
        velocity: 30e3,
        drift: 0.0,
        epoch,
    };
    let spec = RegridSpec {
        outframe: Some(FreqFrame::Lsrk),
        ..Default::default()
    };
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            regrid: Some(&spec),
            frames: &frames,
            ref_time: epoch,
            ..opts()
        },
    )
    .unwrap();
    let out = &planned.outputs[0];
    assert!(out.converts_frame());
    assert_eq!(out.frame, FreqFrame::Lsrk);
    let beta = 30e3 / VEL_C;
    let factor = ((1.0 - beta) / (1.0 + beta)).sqrt();
    assert_relative_eq!(out.ref_doppler, factor, max_relative = 1e-12);
    assert_relative_eq!(out.grid.freqs()[0], 1e9 * factor, max_relative = 1e-12);
}

#[test]
fn test_radial_velocity_inverse() {
    let epoch = Epoch::from_mjd_utc(59000.0);
    let frames = RadialVelocity {
        from: FreqFrame::Topo,
        to: FreqFrame::Bary,
        velocity: 10e3,
        drift: 1.0,
        epoch,
    };
    let dir = RADec { ra: 0.0, dec: 0.0 };
    let t = epoch + hifitime::Duration::from_seconds(100.0);
    let there = frames
        .doppler_factor(FreqFrame::Topo, FreqFrame::Bary, t, dir)
        .unwrap();
    let back = frames
        .doppler_factor(FreqFrame::Bary, FreqFrame::Topo, t, dir)
        .unwrap();
    assert_relative_eq!(there * back, 1.0, max_relative = 1e-12);
    assert!(frames
        .doppler_factor(FreqFrame::Topo, FreqFrame::Geo, t, dir)
        .is_none());
}

#[test]
fn test_frame_codes() {
    for code in 0..9 {
        assert_eq!(FreqFrame::from_code(code).unwrap().code(), code);
    }
    assert!(FreqFrame::from_code(64).is_none());
    assert_eq!("lsrk".parse::<FreqFrame>().unwrap(), FreqFrame::Lsrk);
}

#[test]
fn test_split() {
    assert_eq!(split(10, 3), vec![0..4, 4..8, 8..10]);
    assert_eq!(split(8, 1), vec![0..8]);
    assert_eq!(split(2, 3), vec![0..1, 1..2]);
}

#[test]
fn test_nspws_splits_output() {
    let spw = window("A", 100.0, 100.0, 8);
    let planned = plan(
        &[SelectedSpw::all_channels(0, &spw)],
        &PlanOptions {
            nspws: 2,
            ..opts()
        },
    )
    .unwrap();
    assert_eq!(planned.num_output_spws(), 2);
    assert_eq!(
        planned.outputs[0].part_grid(1).freqs(),
        &[500.0, 600.0, 700.0, 800.0]
    );
    assert_eq!(planned.outputs[0].part_grid(2).num_chans(), 0);
}
