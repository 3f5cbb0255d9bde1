//! C FFI bindings for u-consensus.
//!
//! - **`#[repr(C)]`** result structs; arrays are `pointer + length` pairs
//!   owned by the library and released with the matching `*_free_*`
//!   function.
//! - **Integer error codes**: 0 = success, negative = error.
//! - **Thread-local error message**: `consensus_last_error()`.
//! - **`catch_unwind`** around every entry point.
//!
//! Feature matrices are passed row-major as `n_rows * n_cols` contiguous
//! `f64` values.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::panic;
use std::ptr;
use std::slice;

use crate::base::BaseAlgorithm;
use crate::consensus::{ConsensusClustering, ConsensusConfig, ConsensusMatrix};
use crate::error::ConsensusError;
use crate::hierarchy::Linkage;
use crate::labels::{stable_labels, Label};
use crate::multilevel::{multilevel_cluster, MultiLevelConfig};
use crate::projection::PcaProjector;
use crate::scoring::score_clusters;

// ── Error handling ────────────────────────────────────────────────────

pub const CONSENSUS_OK: i32 = 0;
pub const CONSENSUS_ERR_NULL_PTR: i32 = -1;
pub const CONSENSUS_ERR_INVALID_INPUT: i32 = -2;
pub const CONSENSUS_ERR_FAILED: i32 = -4;
pub const CONSENSUS_ERR_PANIC: i32 = -99;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = CString::new(msg).ok();
    });
}

fn fail(context: &str, e: &ConsensusError) -> i32 {
    set_last_error(&format!("{context}: {e}"));
    match e {
        ConsensusError::InvalidParameter { .. }
        | ConsensusError::InsufficientData { .. }
        | ConsensusError::DimensionMismatch { .. }
        | ConsensusError::NonFiniteValue { .. }
        | ConsensusError::DegenerateData { .. } => CONSENSUS_ERR_INVALID_INPUT,
        _ => CONSENSUS_ERR_FAILED,
    }
}

fn panicked(function: &str) -> i32 {
    set_last_error(&format!("panic in {function}"));
    CONSENSUS_ERR_PANIC
}

/// Returns the last error message, or null if no error.
/// The returned string is valid until the next FFI call on this thread.
///
/// # Safety
/// The caller must not free the returned pointer.
#[no_mangle]
pub extern "C" fn consensus_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| match cell.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Clears the last error message.
#[no_mangle]
pub extern "C" fn consensus_clear_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Returns the version string. Static; do not free.
#[no_mangle]
pub extern "C" fn consensus_version() -> *const c_char {
    c"0.1.0".as_ptr()
}

// ── Buffers ───────────────────────────────────────────────────────────

fn into_raw<T>(values: Vec<T>) -> (*mut T, u32) {
    let len = values.len() as u32;
    (Box::into_raw(values.into_boxed_slice()) as *mut T, len)
}

/// # Safety
/// `ptr` must come from [`into_raw`] with the same `len`, or be null.
unsafe fn free_raw<T>(ptr: *mut T, len: usize) {
    if !ptr.is_null() {
        drop(unsafe { Box::from_raw(slice::from_raw_parts_mut(ptr, len)) });
    }
}

/// # Safety
/// `data` must point to `n_rows * n_cols` readable `f64` values.
unsafe fn rows(data: *const f64, n_rows: u32, n_cols: u32) -> Vec<Vec<f64>> {
    let (n, d) = (n_rows as usize, n_cols as usize);
    let raw = unsafe { slice::from_raw_parts(data, n * d) };
    (0..n).map(|i| raw[i * d..(i + 1) * d].to_vec()).collect()
}

fn linkage_from_code(code: u32) -> Option<Linkage> {
    match code {
        0 => Some(Linkage::Single),
        1 => Some(Linkage::Complete),
        2 => Some(Linkage::Average),
        3 => Some(Linkage::Ward),
        _ => None,
    }
}

fn algorithm_from_code(code: u32) -> Option<BaseAlgorithm> {
    match code {
        0 => Some(BaseAlgorithm::KMeans),
        1 => Some(BaseAlgorithm::GaussianMixture),
        _ => None,
    }
}

// ── Consensus clustering ──────────────────────────────────────────────

/// Parameters of `consensus_cluster`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CConsensusParams {
    /// Number of clusters.
    pub n_clusters: u32,
    /// Pruning threshold in [0, 1].
    pub threshold: f64,
    /// 0 = Single, 1 = Complete, 2 = Average, 3 = Ward.
    pub linkage: u32,
    /// 0 = K-Means, 1 = Gaussian mixture.
    pub algorithm: u32,
    pub rounds: u32,
    /// Fraction of rows per round, in (0, 1].
    pub resampling_ratio: f64,
    pub seed: u64,
}

impl CConsensusParams {
    fn to_config(self) -> Result<ConsensusClustering, String> {
        let linkage =
            linkage_from_code(self.linkage).ok_or_else(|| format!("unknown linkage code {}", self.linkage))?;
        let algorithm = algorithm_from_code(self.algorithm)
            .ok_or_else(|| format!("unknown algorithm code {}", self.algorithm))?;
        Ok(ConsensusClustering::new(self.n_clusters as usize)
            .algorithm(algorithm)
            .linkage(linkage)
            .threshold(self.threshold)
            .rounds(self.rounds as usize)
            .resampling_ratio(self.resampling_ratio)
            .seed(self.seed))
    }
}

/// Fills a `CConsensusParams` with the library defaults for `n_clusters`.
#[no_mangle]
pub extern "C" fn consensus_default_params(n_clusters: u32) -> CConsensusParams {
    let defaults = ConsensusConfig::default().resampling;
    CConsensusParams {
        n_clusters,
        threshold: 0.3,
        linkage: 3,
        algorithm: 0,
        rounds: defaults.rounds as u32,
        resampling_ratio: defaults.resampling_ratio,
        seed: defaults.seed,
    }
}

/// C-compatible consensus clustering result.
#[repr(C)]
pub struct CConsensusResult {
    /// Labels (length = n_labels); -1 marks unstable points.
    pub labels: *mut i32,
    pub n_labels: u32,
    /// Number of non-sentinel clusters.
    pub n_clusters: u32,
    pub outlier_count: u32,
    /// Scored labels, ascending, sentinel first (length = n_scores).
    pub score_labels: *mut i32,
    /// Score of each entry of `score_labels`.
    pub scores: *mut f64,
    pub n_scores: u32,
    pub rounds_completed: u32,
    pub rounds_failed: u32,
}

/// Runs consensus clustering on row-major data.
///
/// # Safety
/// - `data` must point to `n_rows * n_cols` contiguous f64 values (row-major).
/// - `params` and `out` must point to valid structs.
/// - The caller must release `out` with `consensus_free_result`.
#[no_mangle]
pub unsafe extern "C" fn consensus_cluster(
    data: *const f64,
    n_rows: u32,
    n_cols: u32,
    params: *const CConsensusParams,
    out: *mut CConsensusResult,
) -> i32 {
    let result = panic::catch_unwind(|| {
        if data.is_null() || params.is_null() || out.is_null() {
            set_last_error("null pointer");
            return CONSENSUS_ERR_NULL_PTR;
        }

        let points = unsafe { rows(data, n_rows, n_cols) };
        let clustering = match unsafe { *params }.to_config() {
            Ok(c) => c,
            Err(msg) => {
                set_last_error(&msg);
                return CONSENSUS_ERR_INVALID_INPUT;
            }
        };
        let res = match clustering.fit_predict(&points) {
            Ok(r) => r,
            Err(e) => return fail("consensus clustering", &e),
        };

        let n_clusters = stable_labels(&res.labels).len() as u32;
        let outlier_count = res.outlier_count() as u32;
        let (score_labels, scores): (Vec<Label>, Vec<f64>) = res.scores.iter().unzip();
        let (labels, n_labels) = into_raw(res.labels);
        let (score_labels, n_scores) = into_raw(score_labels);
        let (scores, _) = into_raw(scores);

        unsafe {
            *out = CConsensusResult {
                labels,
                n_labels,
                n_clusters,
                outlier_count,
                score_labels,
                scores,
                n_scores,
                rounds_completed: res.report.rounds_completed as u32,
                rounds_failed: res.report.failures.len() as u32,
            };
        }
        CONSENSUS_OK
    });

    result.unwrap_or_else(|_| panicked("consensus_cluster"))
}

/// Releases the arrays of a `CConsensusResult` and nulls its pointers.
///
/// # Safety
/// `out` must have been filled by `consensus_cluster`, or be null.
#[no_mangle]
pub unsafe extern "C" fn consensus_free_result(out: *mut CConsensusResult) {
    if out.is_null() {
        return;
    }
    let r = unsafe { &mut *out };
    unsafe {
        free_raw(r.labels, r.n_labels as usize);
        free_raw(r.score_labels, r.n_scores as usize);
        free_raw(r.scores, r.n_scores as usize);
    }
    r.labels = ptr::null_mut();
    r.score_labels = ptr::null_mut();
    r.scores = ptr::null_mut();
    r.n_labels = 0;
    r.n_scores = 0;
}

// ── Scoring ───────────────────────────────────────────────────────────

/// C-compatible score map.
#[repr(C)]
pub struct CScores {
    /// Labels, ascending, sentinel first.
    pub labels: *mut i32,
    pub scores: *mut f64,
    pub len: u32,
}

/// Scores `labels` against a dense `n × n` consensus matrix.
///
/// # Safety
/// - `matrix` must point to `n * n` f64 values (row-major), `labels` to `n`
///   i32 values.
/// - The caller must release `out` with `consensus_free_scores`.
#[no_mangle]
pub unsafe extern "C" fn consensus_score(
    matrix: *const f64,
    labels: *const i32,
    n: u32,
    out: *mut CScores,
) -> i32 {
    let result = panic::catch_unwind(|| {
        if matrix.is_null() || labels.is_null() || out.is_null() {
            set_last_error("null pointer");
            return CONSENSUS_ERR_NULL_PTR;
        }

        let dense = unsafe { rows(matrix, n, n) };
        let labels = unsafe { slice::from_raw_parts(labels, n as usize) };
        let scores = match ConsensusMatrix::from_dense(&dense).and_then(|m| score_clusters(&m, labels)) {
            Ok(s) => s,
            Err(e) => return fail("scoring", &e),
        };

        let (ls, ss): (Vec<Label>, Vec<f64>) = scores.iter().unzip();
        let (ls, len) = into_raw(ls);
        let (ss, _) = into_raw(ss);
        unsafe {
            *out = CScores {
                labels: ls,
                scores: ss,
                len,
            };
        }
        CONSENSUS_OK
    });

    result.unwrap_or_else(|_| panicked("consensus_score"))
}

/// Releases a `CScores`.
///
/// # Safety
/// `out` must have been filled by `consensus_score`, or be null.
#[no_mangle]
pub unsafe extern "C" fn consensus_free_scores(out: *mut CScores) {
    if out.is_null() {
        return;
    }
    let s = unsafe { &mut *out };
    unsafe {
        free_raw(s.labels, s.len as usize);
        free_raw(s.scores, s.len as usize);
    }
    s.labels = ptr::null_mut();
    s.scores = ptr::null_mut();
    s.len = 0;
}

// ── Multilevel ────────────────────────────────────────────────────────

/// C-compatible level hierarchy.
#[repr(C)]
pub struct CHierarchy {
    /// Labels of every level, level-major: entry `l * n_rows + i` is the
    /// label of row `i` at level `l`.
    pub labels: *mut i32,
    /// Number of levels including level 0.
    pub n_levels: u32,
    pub n_rows: u32,
}

/// Runs multilevel consensus clustering with a standardized PCA
/// projection.
///
/// `levels`, `projection_dim`, `outlier_cap`, `rounds` and `seed` map to
/// the fields of the same name; `ks` lists `n_ks` candidate cluster counts.
///
/// # Safety
/// - `data` must point to `n_rows * n_cols` contiguous f64 values.
/// - `ks` must point to `n_ks` u32 values.
/// - The caller must release `out` with `consensus_free_hierarchy`.
#[no_mangle]
pub unsafe extern "C" fn consensus_multilevel(
    data: *const f64,
    n_rows: u32,
    n_cols: u32,
    ks: *const u32,
    n_ks: u32,
    levels: u32,
    threshold: f64,
    projection_dim: u32,
    outlier_cap: u32,
    rounds: u32,
    seed: u64,
    out: *mut CHierarchy,
) -> i32 {
    let result = panic::catch_unwind(|| {
        if data.is_null() || ks.is_null() || out.is_null() {
            set_last_error("null pointer");
            return CONSENSUS_ERR_NULL_PTR;
        }

        let points = unsafe { rows(data, n_rows, n_cols) };
        let ks = unsafe { slice::from_raw_parts(ks, n_ks as usize) };
        let config = MultiLevelConfig::new()
            .candidate_ks(ks.iter().map(|&k| k as usize).collect())
            .levels(levels as usize)
            .threshold(threshold)
            .projection_dim(projection_dim as usize)
            .outlier_cap(outlier_cap as usize)
            .consensus(ConsensusConfig::default().rounds(rounds as usize).seed(seed));

        let hierarchy = match multilevel_cluster(&points, &config, &PcaProjector) {
            Ok(h) => h,
            Err(e) => return fail("multilevel clustering", &e),
        };

        let n_levels = hierarchy.levels().len() as u32;
        let flat: Vec<i32> = hierarchy.levels().iter().flatten().copied().collect();
        let (labels, _) = into_raw(flat);
        unsafe {
            *out = CHierarchy {
                labels,
                n_levels,
                n_rows,
            };
        }
        CONSENSUS_OK
    });

    result.unwrap_or_else(|_| panicked("consensus_multilevel"))
}

/// Releases a `CHierarchy`.
///
/// # Safety
/// `out` must have been filled by `consensus_multilevel`, or be null.
#[no_mangle]
pub unsafe extern "C" fn consensus_free_hierarchy(out: *mut CHierarchy) {
    if out.is_null() {
        return;
    }
    let h = unsafe { &mut *out };
    unsafe { free_raw(h.labels, h.n_levels as usize * h.n_rows as usize) };
    h.labels = ptr::null_mut();
    h.n_levels = 0;
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn two_blobs_row_major() -> Vec<f64> {
        let mut data = Vec::new();
        for i in 0..6 {
            data.extend([i as f64 * 0.1, 0.0]);
        }
        for i in 0..6 {
            data.extend([10.0 + i as f64 * 0.1, 0.0]);
        }
        data
    }

    fn empty_result() -> CConsensusResult {
        CConsensusResult {
            labels: ptr::null_mut(),
            n_labels: 0,
            n_clusters: 0,
            outlier_count: 0,
            score_labels: ptr::null_mut(),
            scores: ptr::null_mut(),
            n_scores: 0,
            rounds_completed: 0,
            rounds_failed: 0,
        }
    }

    #[test]
    fn ffi_version() {
        let s = unsafe { CStr::from_ptr(consensus_version()) }.to_str().unwrap();
        assert_eq!(s, "0.1.0");
    }

    #[test]
    fn ffi_error_lifecycle() {
        consensus_clear_error();
        assert!(consensus_last_error().is_null());

        set_last_error("test error");
        let msg = unsafe { CStr::from_ptr(consensus_last_error()) }
            .to_str()
            .unwrap();
        assert_eq!(msg, "test error");

        consensus_clear_error();
        assert!(consensus_last_error().is_null());
    }

    #[test]
    fn ffi_cluster_two_blobs() {
        let data = two_blobs_row_major();
        let mut params = consensus_default_params(2);
        params.rounds = 30;
        let mut out = empty_result();
        let rc = unsafe { consensus_cluster(data.as_ptr(), 12, 2, &params, &mut out) };
        assert_eq!(rc, CONSENSUS_OK);
        assert_eq!(out.n_labels, 12);
        assert_eq!(out.n_clusters, 2);
        assert_eq!(out.outlier_count, 0);
        assert_eq!(out.rounds_completed, 30);

        let labels = unsafe { slice::from_raw_parts(out.labels, 12) };
        assert_eq!(&labels[..6], &[0; 6]);
        assert_eq!(&labels[6..], &[1; 6]);
        let score_labels = unsafe { slice::from_raw_parts(out.score_labels, out.n_scores as usize) };
        assert_eq!(score_labels, &[-1, 0, 1]);

        unsafe { consensus_free_result(&mut out) };
        assert!(out.labels.is_null());
    }

    #[test]
    fn ffi_invalid_codes() {
        let data = two_blobs_row_major();
        let mut params = consensus_default_params(2);
        params.linkage = 9;
        let mut out = empty_result();
        let rc = unsafe { consensus_cluster(data.as_ptr(), 12, 2, &params, &mut out) };
        assert_eq!(rc, CONSENSUS_ERR_INVALID_INPUT);

        let mut params = consensus_default_params(2);
        params.resampling_ratio = 0.0;
        let rc = unsafe { consensus_cluster(data.as_ptr(), 12, 2, &params, &mut out) };
        assert_eq!(rc, CONSENSUS_ERR_INVALID_INPUT);
        assert!(!consensus_last_error().is_null());
    }

    #[test]
    fn ffi_null_pointers() {
        let params = consensus_default_params(2);
        let mut out = empty_result();
        let rc = unsafe { consensus_cluster(ptr::null(), 0, 0, &params, &mut out) };
        assert_eq!(rc, CONSENSUS_ERR_NULL_PTR);
        unsafe { consensus_free_result(ptr::null_mut()) };
    }

    #[test]
    fn ffi_score() {
        let matrix = [0.0, 0.2, 1.0, 0.2, 0.0, 1.0, 1.0, 1.0, 0.0];
        let labels = [0, 0, 1];
        let mut out = CScores {
            labels: ptr::null_mut(),
            scores: ptr::null_mut(),
            len: 0,
        };
        let rc = unsafe { consensus_score(matrix.as_ptr(), labels.as_ptr(), 3, &mut out) };
        assert_eq!(rc, CONSENSUS_OK);
        assert_eq!(out.len, 3);
        let scores = unsafe { slice::from_raw_parts(out.scores, 3) };
        assert_eq!(scores[0], 1.0);
        assert!((scores[1] - 0.8).abs() < 1e-12);
        assert_eq!(scores[2], 1.0);
        unsafe { consensus_free_scores(&mut out) };
    }

    #[test]
    fn ffi_multilevel() {
        let data = two_blobs_row_major();
        let ks = [2u32];
        let mut out = CHierarchy {
            labels: ptr::null_mut(),
            n_levels: 0,
            n_rows: 0,
        };
        let rc = unsafe {
            consensus_multilevel(data.as_ptr(), 12, 2, ks.as_ptr(), 1, 1, 0.3, 2, 100, 20, 42, &mut out)
        };
        assert_eq!(rc, CONSENSUS_OK);
        assert_eq!(out.n_levels, 2);
        let labels = unsafe { slice::from_raw_parts(out.labels, 24) };
        assert_eq!(&labels[..12], &[0; 12]);
        assert_eq!(labels[12], 0);
        assert_eq!(labels[23], 1);
        unsafe { consensus_free_hierarchy(&mut out) };
    }

    #[test]
    fn ffi_free_hierarchy_with_large_dimensions() {
        // The level count times the row count does not fit in u32.
        let mut out = CHierarchy {
            labels: ptr::null_mut(),
            n_levels: u32::MAX,
            n_rows: 4,
        };
        unsafe { consensus_free_hierarchy(&mut out) };
        assert!(out.labels.is_null());
        assert_eq!(out.n_levels, 0);
    }
}
