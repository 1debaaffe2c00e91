use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::backend::{InferenceRuntime, InferenceSession};
use crate::decode::RawOutput;
use crate::preprocess::Tensor as InputTensor;

type Plan = TypedRunnableModel<TypedModel>;

/// Portable ONNX runtime (secondary backend).
#[derive(Debug, Clone, Default)]
pub struct TractRuntime;

impl InferenceRuntime for TractRuntime {
    fn name(&self) -> &'static str {
        "tract-onnx"
    }

    fn load(&self, model_path: &Path, input_size: u32) -> Result<Box<dyn InferenceSession>> {
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(Box::new(TractSession { model, side }))
    }
}

pub struct TractSession {
    model: Plan,
    side: usize,
}

impl InferenceSession for TractSession {
    fn run(&mut self, input: &InputTensor) -> Result<RawOutput> {
        let [n, c, h, w] = input.shape;
        anyhow::ensure!(
            (n, c, h, w) == (1, 3, self.side, self.side),
            "input shape {:?} does not match model input [1, 3, {}, {}]",
            input.shape,
            self.side,
            self.side
        );

        let array = tract_ndarray::Array4::from_shape_vec((n, c, h, w), input.data.clone())
            .context("input buffer does not match its shape")?;
        let outputs = self
            .model
            .run(tvec!(array.into_tensor().into()))
            .context("ONNX inference failed")?;

        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(RawOutput {
            shape: view.shape().to_vec(),
            data: view.iter().copied().collect(),
        })
    }

    fn describe(&mut self) -> Result<String> {
        let model = self.model.model();
        let mut out = String::from("ONNX inspect:\n");
        for (i, outlet) in model.input_outlets()?.iter().enumerate() {
            out.push_str(&format!("- input[{}] {:?}\n", i, model.outlet_fact(*outlet)?));
        }
        for (i, outlet) in model.output_outlets()?.iter().enumerate() {
            out.push_str(&format!("- output[{}] {:?}\n", i, model.outlet_fact(*outlet)?));
        }
        Ok(out)
    }
}
