//! End-to-end tests for the fused dropout + residual + layer-norm forward.
//! Run with: cargo test -p norma-kernels --test forward_tests

use half::{bf16, f16};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use norma_core::{DType, Device, NormaError, Tensor};
use norma_kernels::launch::{DeviceProperties, StreamId};
use norma_kernels::{
    dropout_add_ln_fwd, DeviceRuntime, DispatchError, FwdArgs, Generator, HostRuntime,
    HostRuntimeConfig,
};

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() < tol,
            "element {} differs: {} vs {} (tol={})",
            i, x, y, tol
        );
    }
}

fn random_vec(seed: u64, n: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-2.0f32..2.0)).collect()
}

/// Row statistics and normalized output computed in f64.
struct Reference {
    z: Vec<f32>,
    mu: Vec<f32>,
    rs: Vec<f32>,
}

fn reference(x: &[f32], cols: usize, gamma: &[f32], beta: Option<&[f32]>, eps: f32, rms: bool) -> Reference {
    let rows = x.len() / cols;
    let mut out = Reference {
        z: Vec::with_capacity(x.len()),
        mu: Vec::with_capacity(rows),
        rs: Vec::with_capacity(rows),
    };
    for row in x.chunks(cols) {
        let mean = row.iter().map(|&v| v as f64).sum::<f64>() / cols as f64;
        let var = row.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / cols as f64;
        let ms = if rms { var + mean * mean } else { var };
        let rs = 1.0 / (ms + eps as f64).sqrt();
        for (c, &v) in row.iter().enumerate() {
            let y = if rms { v as f64 * rs } else { (v as f64 - mean) * rs };
            let b = beta.map_or(0.0, |b| b[c] as f64);
            out.z.push((gamma[c] as f64 * y + b) as f32);
        }
        out.mu.push(mean as f32);
        out.rs.push(rs as f32);
    }
    out
}

/// A runtime on an accelerator the host tensors never live on.
struct RemoteRuntime;

impl DeviceRuntime for RemoteRuntime {
    fn device(&self) -> Device {
        Device::Cuda(0)
    }

    fn stream(&self) -> StreamId {
        StreamId(7)
    }

    fn properties(&self) -> DeviceProperties {
        HostRuntimeConfig::default().properties()
    }

    fn zeros(&self, shape: &[usize], dtype: DType) -> norma_core::Result<Tensor> {
        Ok(Tensor::zeros(shape, dtype))
    }
}

fn precondition_arg(err: DispatchError) -> &'static str {
    match err {
        DispatchError::Precondition { arg, .. } => arg,
        other => panic!("expected precondition failure, got {other}"),
    }
}

// ============================================================================
// Layer-norm and RMS-norm
// ============================================================================

#[test]
fn test_layer_norm_weight_only() {
    let (rows, cols) = (4, 256);
    let data = random_vec(1, rows * cols);
    let gamma_data = random_vec(2, cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::from_f32(&gamma_data, &[cols]);

    let out = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma)).unwrap();
    let expect = reference(&data, cols, &gamma_data, None, 1e-5, false);

    assert_eq!(out.z.shape().dims(), &[rows, cols]);
    assert_eq!(out.z.dtype(), DType::F32);
    assert!(out.x.is_none());
    assert!(out.dmask.is_none());
    assert_close(&out.mu.to_vec::<f32>().unwrap(), &expect.mu, 1e-5);
    assert_close(&out.rsigma.to_vec::<f32>().unwrap(), &expect.rs, 1e-3);
    assert_close(&out.z.to_vec::<f32>().unwrap(), &expect.z, 1e-4);
}

#[test]
fn test_layer_norm_with_beta() {
    let (rows, cols) = (5, 768);
    let data = random_vec(3, rows * cols);
    let gamma_data = random_vec(4, cols);
    let beta_data = random_vec(5, cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::from_f32(&gamma_data, &[cols]);
    let beta = Tensor::from_f32(&beta_data, &[cols]);

    let args = FwdArgs::new(&x0, &gamma).beta(&beta).epsilon(1e-6);
    let out = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap();
    let expect = reference(&data, cols, &gamma_data, Some(&beta_data), 1e-6, false);
    assert_close(&out.z.to_vec::<f32>().unwrap(), &expect.z, 1e-4);
}

#[test]
fn test_rms_norm_unit_gamma() {
    let (rows, cols) = (3, 512);
    let data = random_vec(6, rows * cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::ones(&[cols]);

    let out = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma).rms_norm(true)).unwrap();
    let z = out.z.to_vec::<f32>().unwrap();
    for (r, row) in data.chunks(cols).enumerate() {
        let rms = (row.iter().map(|v| v * v).sum::<f32>() / cols as f32 + 1e-5).sqrt();
        let expect: Vec<f32> = row.iter().map(|v| v / rms).collect();
        assert_close(&z[r * cols..(r + 1) * cols], &expect, 1e-4);
    }
    let expect = reference(&data, cols, &vec![1.0; cols], None, 1e-5, true);
    assert_close(&out.mu.to_vec::<f32>().unwrap(), &expect.mu, 1e-5);
    assert_close(&out.rsigma.to_vec::<f32>().unwrap(), &expect.rs, 1e-3);
}

#[test]
fn test_padded_hidden_size() {
    // 264 columns run on the 512-column kernel.
    let (rows, cols) = (6, 264);
    let data = random_vec(7, rows * cols);
    let gamma_data = random_vec(8, cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::from_f32(&gamma_data, &[cols]);

    let out = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma)).unwrap();
    let expect = reference(&data, cols, &gamma_data, None, 1e-5, false);
    assert_close(&out.z.to_vec::<f32>().unwrap(), &expect.z, 1e-4);
}

// ============================================================================
// Residual, row/column scaling
// ============================================================================

#[test]
fn test_residual_rowscale_colscale() {
    let (rows, cols) = (4, 1024);
    let data = random_vec(9, rows * cols);
    let res_data = random_vec(10, rows * cols);
    let rowscale_data = vec![0.5f32, 1.0, 2.0, -1.0];
    let colscale_data = random_vec(11, cols);
    let gamma_data = random_vec(12, cols);

    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let residual = Tensor::from_f32(&res_data, &[rows, cols]);
    let rowscale = Tensor::from_f32(&rowscale_data, &[rows]);
    let colscale = Tensor::from_f32(&colscale_data, &[cols]);
    let gamma = Tensor::from_f32(&gamma_data, &[cols]);

    let args = FwdArgs::new(&x0, &gamma)
        .residual(&residual)
        .rowscale(&rowscale)
        .colscale(&colscale);
    let out = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap();

    let x_expect: Vec<f32> = (0..rows * cols)
        .map(|i| data[i] * rowscale_data[i / cols] * colscale_data[i % cols] + res_data[i])
        .collect();
    let x = out.x.expect("x is saved when a residual is given");
    assert_eq!(x.dtype(), DType::F32);
    assert_close(&x.to_vec::<f32>().unwrap(), &x_expect, 1e-5);

    let expect = reference(&x_expect, cols, &gamma_data, None, 1e-5, false);
    assert_close(&out.z.to_vec::<f32>().unwrap(), &expect.z, 1e-4);
}

#[test]
fn test_mixed_precision_residual_in_fp32() {
    let (rows, cols) = (2, 2048);
    let data = random_vec(13, rows * cols);
    let halves: Vec<f16> = data.iter().map(|&v| f16::from_f32(v)).collect();
    let widened: Vec<f32> = halves.iter().map(|v| v.to_f32()).collect();
    let gamma_data = random_vec(14, cols);

    let x0 = Tensor::from_slice(&halves, &[rows, cols]);
    let gamma = Tensor::from_f32(&gamma_data, &[cols]);
    let out = dropout_add_ln_fwd(
        &HostRuntime::default(),
        FwdArgs::new(&x0, &gamma).residual_in_fp32(true),
    )
    .unwrap();

    assert_eq!(out.z.dtype(), DType::F16);
    let x = out.x.expect("x is saved when residual precision differs");
    assert_eq!(x.dtype(), DType::F32);
    assert_eq!(x.to_vec::<f32>().unwrap(), widened);

    let expect = reference(&widened, cols, &gamma_data, None, 1e-5, false);
    let z: Vec<f32> = out.z.to_f32_vec().unwrap();
    for (i, (&got, &want)) in z.iter().zip(&expect.z).enumerate() {
        assert!((got - want).abs() <= 1e-2 + want.abs() * 1e-3, "element {i}: {got} vs {want}");
    }
}

#[test]
fn test_f16_residual_stream() {
    let (rows, cols) = (3, 1536);
    let x0_data: Vec<f16> = random_vec(15, rows * cols).into_iter().map(f16::from_f32).collect();
    let res_data: Vec<f16> = random_vec(16, rows * cols).into_iter().map(f16::from_f32).collect();
    let gamma = Tensor::ones(&[cols]);
    let x0 = Tensor::from_slice(&x0_data, &[rows, cols]);
    let residual = Tensor::from_slice(&res_data, &[rows, cols]);

    let out = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma).residual(&residual)).unwrap();
    let x = out.x.unwrap();
    assert_eq!(x.dtype(), DType::F16);
    let expect: Vec<f32> = x0_data
        .iter()
        .zip(&res_data)
        .map(|(a, b)| f16::from_f32(a.to_f32() + b.to_f32()).to_f32())
        .collect();
    assert_eq!(x.to_f32_vec().unwrap(), expect);
}

#[test]
fn test_bf16_everywhere() {
    let (rows, cols) = (4, 4096);
    let data: Vec<bf16> = random_vec(17, rows * cols).into_iter().map(bf16::from_f32).collect();
    let widened: Vec<f32> = data.iter().map(|v| v.to_f32()).collect();
    let gamma_data: Vec<bf16> = random_vec(18, cols).into_iter().map(bf16::from_f32).collect();
    let gamma_f32: Vec<f32> = gamma_data.iter().map(|v| v.to_f32()).collect();

    let x0 = Tensor::from_slice(&data, &[rows, cols]);
    let gamma = Tensor::from_slice(&gamma_data, &[cols]);
    let out = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma)).unwrap();

    assert_eq!(out.z.dtype(), DType::BF16);
    assert!(out.x.is_none());
    let expect = reference(&widened, cols, &gamma_f32, None, 1e-5, false);
    assert_close(&out.mu.to_vec::<f32>().unwrap(), &expect.mu, 1e-4);
    let z = out.z.to_f32_vec().unwrap();
    for (i, (&got, &want)) in z.iter().zip(&expect.z).enumerate() {
        assert!((got - want).abs() <= 2e-2 + want.abs() * 1e-2, "element {i}: {got} vs {want}");
    }
}

// ============================================================================
// Subsetting
// ============================================================================

#[test]
fn test_gather_scatter_subset() {
    let (rows, cols) = (4, 256);
    let data = random_vec(19, rows * cols);
    let gamma_data = random_vec(20, cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::from_f32(&gamma_data, &[cols]);
    let x0_subset = Tensor::from_i32(&[1, 3], &[2]);
    let z_subset = Tensor::from_i32(&[2, 4], &[2]);

    let args = FwdArgs::new(&x0, &gamma).subset(&x0_subset, &z_subset, 4);
    let out = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap();

    assert_eq!(out.z.shape().dims(), &[4, cols]);
    assert_eq!(out.mu.shape().dims(), &[2]);
    let z = out.z.to_vec::<f32>().unwrap();

    let gathered: Vec<f32> = [&data[0..cols], &data[2 * cols..3 * cols]].concat();
    let expect = reference(&gathered, cols, &gamma_data, None, 1e-5, false);

    assert!(z[0..cols].iter().all(|&v| v == 0.0), "row 0 must stay unwritten");
    assert!(z[2 * cols..3 * cols].iter().all(|&v| v == 0.0), "row 2 must stay unwritten");
    assert_close(&z[cols..2 * cols], &expect.z[0..cols], 1e-4);
    assert_close(&z[3 * cols..4 * cols], &expect.z[cols..], 1e-4);
    assert_eq!(out.x.unwrap().to_vec::<f32>().unwrap(), gathered);
}

#[test]
fn test_subset_zero_index_and_rowscale_const() {
    let cols = 256;
    let data = random_vec(21, 2 * cols);
    let res_data = random_vec(22, 3 * cols);
    let gamma = Tensor::ones(&[cols]);
    let x0 = Tensor::from_f32(&data, &[2, cols]);
    let residual = Tensor::from_f32(&res_data, &[3, cols]);
    // Logical row 1 gathers nothing; logical row 2 is not scattered.
    let x0_subset = Tensor::from_i32(&[2, 0, 1], &[3]);
    let z_subset = Tensor::from_i32(&[1, 2, 0], &[3]);

    let args = FwdArgs::new(&x0, &gamma)
        .residual(&residual)
        .subset(&x0_subset, &z_subset, 2)
        .rowscale_const(0.5);
    let out = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap();

    let x = out.x.unwrap().to_vec::<f32>().unwrap();
    for c in 0..cols {
        assert_eq!(x[c], data[cols + c] * 0.5 + res_data[c]);
        assert_eq!(x[cols + c], res_data[cols + c]);
        assert_eq!(x[2 * cols + c], data[c] * 0.5 + res_data[2 * cols + c]);
    }
    let expect = reference(&x, cols, &vec![1.0; cols], None, 1e-5, false);
    assert_close(&out.z.to_vec::<f32>().unwrap(), &expect.z[..2 * cols], 1e-4);
    assert_close(&out.mu.to_vec::<f32>().unwrap(), &expect.mu, 1e-5);
}

#[test]
fn test_subset_index_out_of_range() {
    let x0 = Tensor::zeros(&[4, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let x0_subset = Tensor::from_i32(&[1, 9], &[2]);
    let z_subset = Tensor::from_i32(&[1, 2], &[2]);
    let args = FwdArgs::new(&x0, &gamma).subset(&x0_subset, &z_subset, 2);
    let err = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap_err();
    assert_eq!(precondition_arg(err), "x0_subset");

    let x0_subset = Tensor::from_i32(&[1, 2], &[2]);
    let z_subset = Tensor::from_i32(&[1, 3], &[2]);
    let args = FwdArgs::new(&x0, &gamma).subset(&x0_subset, &z_subset, 2);
    let err = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap_err();
    assert_eq!(precondition_arg(err), "z_subset");
}

// ============================================================================
// Dropout
// ============================================================================

#[test]
fn test_dropout_mask_and_scaling() {
    let (rows, cols) = (16, 256);
    let data = random_vec(23, rows * cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::ones(&[cols]);
    let generator = Generator::new(1234);

    let args = FwdArgs::new(&x0, &gamma).dropout(0.5).generator(&generator);
    let out = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap();

    let mask = out.dmask.expect("dropout returns a mask");
    assert_eq!(mask.dtype(), DType::U8);
    assert_eq!(mask.shape().dims(), &[rows, cols]);
    let mask = mask.to_vec::<u8>().unwrap();
    let x = out.x.expect("dropout saves x").to_vec::<f32>().unwrap();

    let kept = mask.iter().filter(|&&m| m == 1).count();
    let fraction = kept as f32 / mask.len() as f32;
    assert!((fraction - 0.5).abs() < 0.05, "kept fraction {fraction}");
    for i in 0..rows * cols {
        match mask[i] {
            1 => assert_eq!(x[i], data[i] * 2.0),
            0 => assert_eq!(x[i], 0.0),
            m => panic!("mask value {m}"),
        }
    }
    assert!(generator.offset() > 0);
    assert_eq!(generator.offset() % 4, 0);
}

#[test]
fn test_dropout_determinism() {
    let (rows, cols) = (8, 512);
    let x0 = Tensor::from_f32(&random_vec(24, rows * cols), &[rows, cols]);
    let gamma = Tensor::ones(&[cols]);
    let rt = HostRuntime::default();
    let run = |generator: &Generator| {
        let args = FwdArgs::new(&x0, &gamma).dropout(0.3).generator(generator);
        let out = dropout_add_ln_fwd(&rt, args).unwrap();
        (out.dmask.unwrap().to_vec::<u8>().unwrap(), out.z.to_vec::<f32>().unwrap())
    };

    let a = Generator::new(99);
    let b = Generator::new(99);
    let (mask_a, z_a) = run(&a);
    let (mask_b, z_b) = run(&b);
    assert_eq!(mask_a, mask_b);
    assert_eq!(z_a, z_b);

    let (mask_next, _) = run(&a);
    assert_ne!(mask_a, mask_next);
}

#[test]
fn test_dropout_offsets_do_not_overlap() {
    let (rows, cols) = (64, 256);
    let x0 = Tensor::from_f32(&random_vec(25, rows * cols), &[rows, cols]);
    let gamma = Tensor::ones(&[cols]);
    let generator = Generator::new(5);
    let rt = HostRuntime::default();

    let mut last = generator.offset();
    for _ in 0..3 {
        let args = FwdArgs::new(&x0, &gamma).dropout(0.1).generator(&generator);
        dropout_add_ln_fwd(&rt, args).unwrap();
        let now = generator.offset();
        // One row iteration of two 4-wide loads per thread.
        assert_eq!(now - last, 8);
        last = now;
    }
}

#[test]
fn test_no_dropout_leaves_generator_alone() {
    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let generator = Generator::new(5);
    let args = FwdArgs::new(&x0, &gamma).generator(&generator);
    dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap();
    assert_eq!(generator.offset(), 0);
}

#[test]
fn test_tiny_dropout_still_masks_and_advances() {
    // 1e-9 leaves the f32 keep probability at exactly 1.
    let (rows, cols) = (2, 256);
    let data = random_vec(30, rows * cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::ones(&[cols]);
    let generator = Generator::new(9);

    let args = FwdArgs::new(&x0, &gamma).dropout(1e-9).generator(&generator);
    let out = dropout_add_ln_fwd(&HostRuntime::default(), args).unwrap();

    let x = out.x.expect("x saved under dropout");
    assert_eq!(x.to_vec::<f32>().unwrap(), data);
    let mask = out.dmask.expect("mask allocated under dropout").to_vec::<u8>().unwrap();
    assert!(mask.iter().all(|&m| m == 1));
    assert_eq!(generator.offset(), 8);

    let expect = reference(&data, cols, &vec![1.0; cols], None, 1e-5, false);
    assert_close(&out.z.to_vec::<f32>().unwrap(), &expect.z, 1e-4);
}

// ============================================================================
// Cooperative (multi-CTA) rows
// ============================================================================

#[test]
fn test_multi_cta_hidden_8192() {
    let (rows, cols) = (3, 8192);
    let data = random_vec(26, rows * cols);
    let gamma_data = random_vec(27, cols);
    let x0 = Tensor::from_f32(&data, &[rows, cols]);
    let gamma = Tensor::from_f32(&gamma_data, &[cols]);

    let out = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma)).unwrap();
    let expect = reference(&data, cols, &gamma_data, None, 1e-5, false);
    assert_close(&out.mu.to_vec::<f32>().unwrap(), &expect.mu, 1e-4);
    assert_close(&out.rsigma.to_vec::<f32>().unwrap(), &expect.rs, 1e-3);
    assert_close(&out.z.to_vec::<f32>().unwrap(), &expect.z, 1e-3);
}

#[test]
fn test_multi_cta_many_row_iterations() {
    // One CTA column forces every row through the same pair of barrier slots.
    let rt = HostRuntime::new(HostRuntimeConfig {
        multiprocessor_count: 1,
        max_ctas_per_multiprocessor: 1,
        ..Default::default()
    });
    let (rows, cols) = (5, 6000);
    let data = random_vec(28, rows * cols);
    let halves: Vec<f16> = data.iter().map(|&v| f16::from_f32(v)).collect();
    let widened: Vec<f32> = halves.iter().map(|v| v.to_f32()).collect();
    let x0 = Tensor::from_slice(&halves, &[rows, cols]);
    let gamma = Tensor::from_slice(&vec![f16::ONE; cols], &[cols]);

    let out = dropout_add_ln_fwd(&rt, FwdArgs::new(&x0, &gamma).rms_norm(true)).unwrap();
    let expect = reference(&widened, cols, &vec![1.0; cols], None, 1e-5, true);
    assert_close(&out.mu.to_vec::<f32>().unwrap(), &expect.mu, 1e-4);
    assert_close(&out.rsigma.to_vec::<f32>().unwrap(), &expect.rs, 1e-3);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_rejects_bad_scalars() {
    let rt = HostRuntime::default();
    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let err = dropout_add_ln_fwd(&rt, FwdArgs::new(&x0, &gamma).dropout(1.0)).unwrap_err();
    assert_eq!(precondition_arg(err), "dropout_p");
    let err = dropout_add_ln_fwd(&rt, FwdArgs::new(&x0, &gamma).epsilon(-1.0)).unwrap_err();
    assert_eq!(precondition_arg(err), "epsilon");
}

#[test]
fn test_rejects_hidden_8193() {
    let x0 = Tensor::zeros(&[1, 8193], DType::F32);
    let gamma = Tensor::zeros(&[8193], DType::F32);
    let err = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma)).unwrap_err();
    let msg = err.to_string();
    assert_eq!(precondition_arg(err), "hidden_size");
    assert!(msg.contains("exceeds"), "{msg}");
}

#[test]
fn test_rejects_non_contiguous_input() {
    let data = random_vec(29, 256 * 4);
    let x0 = Tensor::from_f32(&data, &[256, 4]).transpose().unwrap();
    assert_eq!(x0.shape().dims(), &[4, 256]);
    let gamma = Tensor::ones(&[256]);
    let err = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma)).unwrap_err();
    assert_eq!(precondition_arg(err), "x0");
}

#[test]
fn test_rejects_non_resident_tensors() {
    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let err = dropout_add_ln_fwd(&RemoteRuntime, FwdArgs::new(&x0, &gamma)).unwrap_err();
    let msg = err.to_string();
    assert_eq!(precondition_arg(err), "x0");
    assert!(msg.contains("cuda:0"), "{msg}");
}

#[test]
fn test_rejects_each_non_resident_argument() {
    let rt = HostRuntime::default();
    let remote = |t: Tensor| t.with_device(Device::Cuda(1));

    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let idx = Tensor::from_i32(&[1, 2], &[2]);
    let base = FwdArgs::new(&x0, &gamma);

    let far_x0 = remote(x0.clone());
    let err = dropout_add_ln_fwd(&rt, FwdArgs::new(&far_x0, &gamma)).unwrap_err();
    assert_eq!(precondition_arg(err), "x0");

    let far_gamma = remote(gamma.clone());
    let err = dropout_add_ln_fwd(&rt, FwdArgs::new(&x0, &far_gamma)).unwrap_err();
    assert_eq!(precondition_arg(err), "gamma");

    let beta = remote(Tensor::zeros(&[256], DType::F32));
    let err = dropout_add_ln_fwd(&rt, base.beta(&beta)).unwrap_err();
    assert_eq!(precondition_arg(err), "beta");

    let residual = remote(Tensor::zeros(&[2, 256], DType::F32));
    let err = dropout_add_ln_fwd(&rt, base.residual(&residual)).unwrap_err();
    assert_eq!(precondition_arg(err), "residual");

    let rowscale = remote(Tensor::ones(&[2]));
    let err = dropout_add_ln_fwd(&rt, base.rowscale(&rowscale)).unwrap_err();
    assert_eq!(precondition_arg(err), "rowscale");

    let colscale = remote(Tensor::ones(&[256]));
    let err = dropout_add_ln_fwd(&rt, base.colscale(&colscale)).unwrap_err();
    assert_eq!(precondition_arg(err), "colscale");

    let far_idx = remote(idx.clone());
    let err = dropout_add_ln_fwd(&rt, base.subset(&far_idx, &idx, 2)).unwrap_err();
    assert_eq!(precondition_arg(err), "x0_subset");
    let err = dropout_add_ln_fwd(&rt, base.subset(&idx, &far_idx, 2)).unwrap_err();
    let msg = err.to_string();
    assert_eq!(precondition_arg(err), "z_subset");
    assert!(msg.contains("cuda:1"), "{msg}");
}

#[test]
fn test_rejects_non_contiguous_operands() {
    let rt = HostRuntime::default();
    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let base = FwdArgs::new(&x0, &gamma);

    let residual = Tensor::zeros(&[256, 2], DType::F32).transpose().unwrap();
    assert_eq!(residual.shape().dims(), &[2, 256]);
    let err = dropout_add_ln_fwd(&rt, base.residual(&residual)).unwrap_err();
    assert_eq!(precondition_arg(err), "residual");

    // Column views of a single row: strided, so never packed.
    let rowscale = Tensor::ones(&[1, 2]).transpose().unwrap();
    let err = dropout_add_ln_fwd(&rt, base.rowscale(&rowscale)).unwrap_err();
    assert_eq!(precondition_arg(err), "rowscale");

    let colscale = Tensor::ones(&[1, 256]).transpose().unwrap();
    let err = dropout_add_ln_fwd(&rt, base.colscale(&colscale)).unwrap_err();
    assert_eq!(precondition_arg(err), "colscale");
}

#[test]
fn test_rejects_scale_shape_and_dtype() {
    let rt = HostRuntime::default();
    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let base = FwdArgs::new(&x0, &gamma);

    let long_rowscale = Tensor::ones(&[3]);
    let err = dropout_add_ln_fwd(&rt, base.rowscale(&long_rowscale)).unwrap_err();
    assert_eq!(precondition_arg(err), "rowscale");

    let short_colscale = Tensor::ones(&[128]);
    let err = dropout_add_ln_fwd(&rt, base.colscale(&short_colscale)).unwrap_err();
    assert_eq!(precondition_arg(err), "colscale");

    // colscale follows the weight precision, not the input precision.
    let half_x0 = Tensor::zeros(&[2, 256], DType::F16);
    let half_colscale = Tensor::zeros(&[256], DType::F16);
    let args = FwdArgs::new(&half_x0, &gamma).colscale(&half_colscale);
    let err = dropout_add_ln_fwd(&rt, args).unwrap_err();
    let msg = err.to_string();
    assert_eq!(precondition_arg(err), "colscale");
    assert!(msg.contains("expected dtype f32"), "{msg}");
}

#[test]
fn test_rejects_subset_length_mismatch() {
    let rt = HostRuntime::default();
    let x0 = Tensor::zeros(&[4, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let x0_subset = Tensor::from_i32(&[1, 2], &[2]);
    let z_subset = Tensor::from_i32(&[1, 2, 3], &[3]);
    let args = FwdArgs::new(&x0, &gamma).subset(&x0_subset, &z_subset, 4);
    assert_eq!(precondition_arg(dropout_add_ln_fwd(&rt, args).unwrap_err()), "z_subset");

    // Subset rows also size rowscale.
    let rowscale = Tensor::ones(&[4]);
    let z_subset = Tensor::from_i32(&[1, 2], &[2]);
    let args = FwdArgs::new(&x0, &gamma)
        .subset(&x0_subset, &z_subset, 4)
        .rowscale(&rowscale);
    assert_eq!(precondition_arg(dropout_add_ln_fwd(&rt, args).unwrap_err()), "rowscale");
}

#[test]
fn test_rejects_beta_dtype_mismatch() {
    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let beta = Tensor::zeros(&[256], DType::F16);
    let err = dropout_add_ln_fwd(&HostRuntime::default(), FwdArgs::new(&x0, &gamma).beta(&beta)).unwrap_err();
    assert_eq!(precondition_arg(err), "beta");
}

#[test]
fn test_rejects_unpaired_or_mistyped_subset() {
    let rt = HostRuntime::default();
    let x0 = Tensor::zeros(&[2, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let idx = Tensor::from_i32(&[1, 2], &[2]);
    let float_idx = Tensor::from_f32(&[1.0, 2.0], &[2]);

    let mut args = FwdArgs::new(&x0, &gamma);
    args.x0_subset = Some(&idx);
    assert_eq!(precondition_arg(dropout_add_ln_fwd(&rt, args).unwrap_err()), "z_subset");

    let mut args = FwdArgs::new(&x0, &gamma);
    args.z_subset = Some(&idx);
    assert_eq!(precondition_arg(dropout_add_ln_fwd(&rt, args).unwrap_err()), "x0_subset");

    let args = FwdArgs::new(&x0, &gamma).subset(&float_idx, &idx, 2);
    assert_eq!(precondition_arg(dropout_add_ln_fwd(&rt, args).unwrap_err()), "x0_subset");
}

#[test]
fn test_unregistered_precisions() {
    let rt = HostRuntime::default();
    let x0 = Tensor::zeros(&[2, 256], DType::F16);
    let gamma = Tensor::zeros(&[256], DType::BF16);
    let err = dropout_add_ln_fwd(&rt, FwdArgs::new(&x0, &gamma)).unwrap_err();
    assert!(
        matches!(
            err,
            DispatchError::UnsupportedConfig { hidden_size: 256, wtype: DType::BF16, itype: DType::F16, .. }
        ),
        "{err}"
    );

    let x0 = Tensor::zeros(&[2, 256], DType::F64);
    let gamma = Tensor::zeros(&[256], DType::F64);
    let err = dropout_add_ln_fwd(&rt, FwdArgs::new(&x0, &gamma)).unwrap_err();
    assert!(matches!(err, DispatchError::UnsupportedType(DType::F64)), "{err}");
}

#[test]
fn test_allocator_failure_propagates() {
    let rt = HostRuntime::new(HostRuntimeConfig {
        memory_limit_bytes: Some(1024),
        ..Default::default()
    });
    let x0 = Tensor::zeros(&[4, 256], DType::F32);
    let gamma = Tensor::ones(&[256]);
    let err = dropout_add_ln_fwd(&rt, FwdArgs::new(&x0, &gamma)).unwrap_err();
    assert!(matches!(err, DispatchError::Core(NormaError::StorageError(_))), "{err}");
}
