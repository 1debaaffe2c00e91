//! Element encoding for runtime tensors.
//!
//! Float models take the preprocessed `[0,1]` values as-is. Quantized models (EdgeTPU
//! compiled ones always are) take `round(x / scale) + zero_point` and return values that are
//! mapped back with `(q - zero_point) * scale`.

use anyhow::{bail, ensure, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Float32,
    UInt8,
    Int8,
}

impl ElementType {
    /// Map a `TfLiteType` code.
    pub fn from_tflite(code: i32) -> Result<Self> {
        match code {
            1 => Ok(ElementType::Float32),
            3 => Ok(ElementType::UInt8),
            9 => Ok(ElementType::Int8),
            other => bail!("unsupported tensor element type (TfLiteType {})", other),
        }
    }

    pub fn size(self) -> usize {
        match self {
            ElementType::Float32 => 4,
            ElementType::UInt8 | ElementType::Int8 => 1,
        }
    }

    fn range(self) -> (i32, i32) {
        match self {
            ElementType::Int8 => (i8::MIN as i32, i8::MAX as i32),
            _ => (u8::MIN as i32, u8::MAX as i32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
    pub scale: f32,
    pub zero_point: i32,
}

impl Quantization {
    fn checked(self, ty: ElementType) -> Result<Self> {
        ensure!(
            self.scale.is_finite() && self.scale > 0.0,
            "{:?} tensor has invalid quantization scale {}",
            ty,
            self.scale
        );
        Ok(self)
    }
}

/// Encode `values` into the byte layout of a tensor of `ty` holding exactly `byte_size` bytes.
pub fn encode(values: &[f32], ty: ElementType, quant: Quantization, byte_size: usize) -> Result<Vec<u8>> {
    let need = values.len() * ty.size();
    ensure!(
        need == byte_size,
        "input tensor expects {} bytes, {} {:?} elements take {}",
        byte_size,
        values.len(),
        ty,
        need
    );

    if ty == ElementType::Float32 {
        return Ok(values.iter().flat_map(|v| v.to_ne_bytes()).collect());
    }

    let q = quant.checked(ty)?;
    let (lo, hi) = ty.range();
    Ok(values
        .iter()
        .map(|&v| {
            let level = ((v / q.scale).round() as i32).saturating_add(q.zero_point).clamp(lo, hi);
            match ty {
                ElementType::Int8 => level as i8 as u8,
                _ => level as u8,
            }
        })
        .collect())
}

/// Decode raw tensor bytes of `ty` back into floats.
pub fn decode(bytes: &[u8], ty: ElementType, quant: Quantization) -> Result<Vec<f32>> {
    match ty {
        ElementType::Float32 => {
            ensure!(bytes.len() % 4 == 0, "float32 tensor holds {} bytes", bytes.len());
            Ok(bytes
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect())
        }
        ElementType::UInt8 => {
            let q = quant.checked(ty)?;
            Ok(bytes.iter().map(|&b| (b as i32 - q.zero_point) as f32 * q.scale).collect())
        }
        ElementType::Int8 => {
            let q = quant.checked(ty)?;
            Ok(bytes.iter().map(|&b| (b as i8 as i32 - q.zero_point) as f32 * q.scale).collect())
        }
    }
}
