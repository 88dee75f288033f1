// Decoder inputs
pub const DECODER_START_VALUE: f32 = -100.0; // "go" value placed before the first target step

// Reproducibility
pub const DEFAULT_SEED: u64 = 1337;

// Model defaults
pub const DEFAULT_HIDDEN_SIZE: usize = 10;
pub const DEFAULT_NUM_LAYERS: usize = 2;
pub const DEFAULT_STEPS_TRAIN: usize = 20;
pub const DEFAULT_STEPS_PREDICT: usize = 5;

// ReduceLROnPlateau ("min" mode, relative threshold)
pub const PLATEAU_FACTOR: f64 = 0.1;
pub const PLATEAU_PATIENCE: usize = 2;
pub const PLATEAU_THRESHOLD: f64 = 1e-5;

// Adadelta
pub const ADADELTA_RHO: f64 = 0.9;
pub const ADADELTA_EPSILON: f64 = 1e-6;

// Checkpoint layout
pub const CHECKPOINT_ROOT: &str = "models";
pub const EXPERIMENT_ROOT: &str = "experiments";
pub const MODEL_FILE_NAME: &str = "model.bin";
pub const OPTIMIZER_FILE_NAME: &str = "optimizer.bin";
pub const METADATA_FILE_NAME: &str = "metadata.json";
