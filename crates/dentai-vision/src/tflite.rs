use anyhow::{Context, Result};
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, path::Path, ptr};
use tracing::info;

use crate::backend::{InferenceRuntime, InferenceSession};
use crate::decode::RawOutput;
use crate::preprocess::Tensor;
use crate::quant::{self, ElementType, Quantization};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

#[repr(C)]
#[derive(Clone, Copy)]
struct TfLiteQuantizationParams {
    scale: f32,
    zero_point: i32,
}

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
    fn TfLiteTensorType(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorQuantizationParams(tensor: *const TfLiteTensor) -> TfLiteQuantizationParams;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "vision-coral")]
#[link(name = "edgetpu")]
extern "C" {
    fn edgetpu_create_delegate(device_type: c_int, device_path: *const c_char, options: *const c_char) -> *mut TfLiteDelegate;
    fn edgetpu_free_delegate(delegate: *mut TfLiteDelegate);
}

/// TensorFlow Lite C runtime (primary backend).
#[derive(Debug, Clone)]
pub struct TfliteRuntime {
    pub num_threads: i32,
    pub use_coral: bool,
}

impl InferenceRuntime for TfliteRuntime {
    fn name(&self) -> &'static str {
        "tflite"
    }

    fn load(&self, model_path: &Path, _input_size: u32) -> Result<Box<dyn InferenceSession>> {
        Ok(Box::new(TfliteSession::open(model_path, self.num_threads, self.use_coral)?))
    }
}

pub struct TfliteSession {
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    #[cfg(feature = "vision-coral")]
    delegate: Option<*mut TfLiteDelegate>,
}

// The interpreter is only touched through &mut self, and the owning backend serializes access.
unsafe impl Send for TfliteSession {}

impl TfliteSession {
    fn open(model_path: &Path, num_threads: i32, use_coral: bool) -> Result<Self> {
        let path_str = model_path.to_str().context("model path is not valid UTF-8")?;
        let cpath = CString::new(path_str)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", path_str);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        if opts.is_null() {
            unsafe { TfLiteModelDelete(model) };
            anyhow::bail!("failed to create tflite options");
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, num_threads.max(1)); }

        // Partially built session; Drop releases whatever is non-null on early return.
        #[allow(unused_mut)]
        let mut session = Self {
            model,
            opts,
            interp: ptr::null_mut(),
            #[cfg(feature = "vision-coral")]
            delegate: None,
        };

        #[cfg(feature = "vision-coral")]
        if use_coral {
            let d = unsafe { edgetpu_create_delegate(0, ptr::null(), ptr::null()) };
            anyhow::ensure!(!d.is_null(), "failed to create EdgeTPU delegate");
            unsafe { TfLiteInterpreterOptionsAddDelegate(session.opts, d); }
            session.delegate = Some(d);
        }

        #[cfg(not(feature = "vision-coral"))]
        if use_coral {
            anyhow::bail!("use_coral=true but binary not built with --features vision-coral");
        }

        session.interp = unsafe { TfLiteInterpreterCreate(session.model, session.opts) };
        anyhow::ensure!(!session.interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(session.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!("vision: tflite interpreter ready ({} threads)", num_threads.max(1));
        Ok(session)
    }
}

impl InferenceSession for TfliteSession {
    fn run(&mut self, input: &Tensor) -> Result<RawOutput> {
        let in_tensor = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!in_tensor.is_null(), "no input tensor");

        let (in_type, in_quant) = tensor_encoding(in_tensor)?;
        let in_bytes = unsafe { TfLiteTensorByteSize(in_tensor) };
        let encoded = quant::encode(&input.data, in_type, in_quant, in_bytes)
            .with_context(|| format!("input dims {:?}", tensor_dims(in_tensor)))?;
        let in_ptr = unsafe { TfLiteTensorData(in_tensor) as *mut u8 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");
        unsafe { ptr::copy_nonoverlapping(encoded.as_ptr(), in_ptr, encoded.len()); }

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out.is_null(), "no output tensor 0");

        let shape = tensor_dims(out).into_iter().map(|d| d.max(0) as usize).collect();
        let (out_type, out_quant) = tensor_encoding(out)?;
        let out_ptr = unsafe { TfLiteTensorData(out) as *const u8 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
        let out_bytes = unsafe { TfLiteTensorByteSize(out) };
        let raw = unsafe { std::slice::from_raw_parts(out_ptr, out_bytes) };
        let data = quant::decode(raw, out_type, out_quant).context("output tensor")?;

        Ok(RawOutput { data, shape })
    }

    fn describe(&mut self) -> Result<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let in_dims = tensor_dims(input);
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let (in_type, in_quant) = tensor_encoding(input)?;

        let out0 = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out0.is_null(), "no output tensor 0");
        let out_dims = tensor_dims(out0);
        let out_bytes = unsafe { TfLiteTensorByteSize(out0) };
        let (out_type, out_quant) = tensor_encoding(out0)?;

        Ok(format!(
            "TFLite inspect:\n- input[0] dims={:?} bytes={} type={:?} {:?}\n- output[0] dims={:?} bytes={} type={:?} {:?}\n",
            in_dims, in_bytes, in_type, in_quant, out_dims, out_bytes, out_type, out_quant
        ))
    }
}

fn tensor_encoding(t: *const TfLiteTensor) -> Result<(ElementType, Quantization)> {
    let ty = ElementType::from_tflite(unsafe { TfLiteTensorType(t) })?;
    let q = unsafe { TfLiteTensorQuantizationParams(t) };
    Ok((ty, Quantization { scale: q.scale, zero_point: q.zero_point }))
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd.max(0) as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for TfliteSession {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        #[cfg(feature = "vision-coral")]
        unsafe {
            if let Some(d) = self.delegate {
                edgetpu_free_delegate(d);
            }
        }
    }
}
