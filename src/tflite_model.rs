use error_stack::Report;

use crate::model_aggregator::{ScorerContext, SiteScorer};

/// Pileup model to use
///
/// This reflects the final pileup model selection. It allows us to keep any
/// option synthesis logic out of the model init.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ModelSelection {
    /// This should only be selected for count mode
    #[default]
    None,

    /// A tflite model file
    Filename(String),
}

/// Boxed scorer owned by a single worker thread
pub type WorkerSiteScorer = Box<dyn SiteScorer + Send>;

/// Load the selected model into a new scorer
///
/// Each worker thread holds its own scorer, so this is called once per worker.
///
pub fn create_site_scorer(
    model_selection: &ModelSelection,
) -> error_stack::Result<Option<WorkerSiteScorer>, ScorerContext> {
    match model_selection {
        ModelSelection::None => Ok(None),
        ModelSelection::Filename(filename) => {
            let scorer = model::TFLiteModelData::new(filename)?;
            Ok(Some(Box::new(scorer)))
        }
    }
}

#[cfg(not(feature = "tflite"))]
mod model {
    use super::*;
    use crate::model_aggregator::CpgFeatures;

    /// Stand-in used when the tflite feature is disabled, which can never be constructed
    pub enum TFLiteModelData {}

    impl TFLiteModelData {
        pub fn new(filename: &str) -> error_stack::Result<Self, ScorerContext> {
            Err(Report::new(ScorerContext).attach_printable(format!(
                "Can't load model file '{filename}': this binary was built without tflite support"
            )))
        }
    }

    impl SiteScorer for TFLiteModelData {
        fn score_window(&mut self, _: &[CpgFeatures]) -> error_stack::Result<f32, ScorerContext> {
            match *self {}
        }
    }
}

#[cfg(feature = "tflite")]
mod model {
    use super::*;
    use crate::model_aggregator::{CpgFeatures, MODEL_CPG_WINDOW_COUNT, MODEL_FEATURES_PER_CPG};
    use tflite::ops::builtin::BuiltinOpResolver;

    fn tflite_error<E: std::fmt::Debug>(msg: &str) -> impl FnOnce(E) -> Report<ScorerContext> + '_ {
        move |e| Report::new(ScorerContext).attach_printable(format!("{msg}: {e:?}"))
    }

    pub struct TFLiteModelData {
        interpreter: tflite::Interpreter<'static, BuiltinOpResolver>,
        input_index: tflite::TensorIndex,
        output_index: tflite::TensorIndex,
    }

    impl TFLiteModelData {
        pub fn new(filename: &str) -> error_stack::Result<Self, ScorerContext> {
            let model = tflite::FlatBufferModel::build_from_file(filename)
                .map_err(tflite_error("Unable to read tflite model file"))
                .map_err(|e| e.attach_printable(format!("Model file: '{filename}'")))?;
            let resolver = BuiltinOpResolver::default();
            let builder = tflite::InterpreterBuilder::new(model, resolver)
                .map_err(tflite_error("Unable to create tflite interpreter builder"))?;

            let mut interpreter = builder
                .build()
                .map_err(tflite_error("Unable to build tflite interpreter"))?;
            interpreter
                .allocate_tensors()
                .map_err(tflite_error("Unable to allocate tflite tensors"))?;

            let inputs = interpreter.inputs().to_vec();
            let outputs = interpreter.outputs().to_vec();
            if inputs.len() != 1 || outputs.len() != 1 {
                return Err(Report::new(ScorerContext).attach_printable(format!(
                    "Model file '{filename}' has {} inputs and {} outputs, expected 1 of each",
                    inputs.len(),
                    outputs.len()
                )));
            }

            Ok(Self {
                interpreter,
                input_index: inputs[0],
                output_index: outputs[0],
            })
        }
    }

    impl SiteScorer for TFLiteModelData {
        fn score_window(
            &mut self,
            window: &[CpgFeatures],
        ) -> error_stack::Result<f32, ScorerContext> {
            let input_tensor: &mut [f32] = self
                .interpreter
                .tensor_data_mut(self.input_index)
                .map_err(tflite_error("Unable to access model input tensor"))?;

            let input_size = MODEL_CPG_WINDOW_COUNT * MODEL_FEATURES_PER_CPG;
            if input_tensor.len() != input_size {
                return Err(Report::new(ScorerContext).attach_printable(format!(
                    "Model input tensor size is {}, expected {input_size}",
                    input_tensor.len()
                )));
            }

            for (input_val, &feature_val) in input_tensor.iter_mut().zip(window.iter().flatten()) {
                *input_val = feature_val;
            }

            self.interpreter
                .invoke()
                .map_err(tflite_error("Model invocation failed"))?;

            let output_tensor: &[f32] = self
                .interpreter
                .tensor_data(self.output_index)
                .map_err(tflite_error("Unable to access model output tensor"))?;

            output_tensor
                .first()
                .copied()
                .ok_or_else(|| Report::new(ScorerContext).attach_printable("Empty model output"))
        }
    }
}
