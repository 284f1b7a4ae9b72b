#![doc = include_str!("../README.md")]

pub mod pipeline;
pub mod resources;
pub mod rotator;
pub mod runtime;

pub use pipeline::{DenoisePipeline, PipelineConfig, PipelineMetrics, RunReport, Stage};
pub use resources::ResourceSet;
pub use rotator::BufferRotator;
pub use runtime::{RunConfig, RunRequest};

#[cfg(test)]
mod tests {
    use super::RunConfig;

    #[test]
    fn run_config_defaults_match_raw_input_defaults() {
        let cfg = RunConfig::default();
        assert_eq!((cfg.width, cfg.height), (1920, 1080));
        assert_eq!(cfg.fps, "30");
        assert_eq!(cfg.strength, 1.0);
    }
}
