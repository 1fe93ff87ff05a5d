//! Analysis requests and their engine command strings
//!
//! The engine's `save` selection is additive across successive `save`
//! instructions, so every dispatch starts with [`RESET_SAVES_COMMAND`]
//! before naming the vectors for the new run.

use crate::error::{Result, SimError};
use crate::types::SweepMode;

/// Clears every previous `save` selection
pub const RESET_SAVES_COMMAND: &str = "delete all";
/// Stops the background thread
pub const HALT_COMMAND: &str = "bg_halt";
/// Terminates the engine
pub const QUIT_COMMAND: &str = "quit";

/// A typed analysis request
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisRequest {
    /// Run the analyses named in the circuit description
    Run,
    OperatingPoint,
    Transient {
        step: f64,
        stop: f64,
        start: f64,
    },
    DcSweep {
        source: String,
        start: f64,
        stop: f64,
        increment: f64,
    },
    AcSweep {
        mode: SweepMode,
        points: u32,
        fstart: f64,
        fstop: f64,
    },
    Noise {
        output: String,
        source: String,
        mode: SweepMode,
        points: u32,
        fstart: f64,
        fstop: f64,
    },
}

impl AnalysisRequest {
    /// Short analysis name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisRequest::Run => "run",
            AnalysisRequest::OperatingPoint => "op",
            AnalysisRequest::Transient { .. } => "tran",
            AnalysisRequest::DcSweep { .. } => "dc",
            AnalysisRequest::AcSweep { .. } => "ac",
            AnalysisRequest::Noise { .. } => "noise",
        }
    }

    /// Check parameters before anything is sent to the engine
    pub fn validate(&self) -> Result<()> {
        match self {
            AnalysisRequest::Run | AnalysisRequest::OperatingPoint => Ok(()),
            AnalysisRequest::Transient { step, stop, start } => {
                finite(&[("step", *step), ("stop", *stop), ("start", *start)])?;
                if *step <= 0.0 {
                    return Err(invalid(format!("tran step must be positive, got {}", step)));
                }
                if *start < 0.0 || *stop <= *start {
                    return Err(invalid(format!(
                        "tran needs 0 <= start < stop, got start={} stop={}",
                        start, stop
                    )));
                }
                Ok(())
            }
            AnalysisRequest::DcSweep {
                source,
                start,
                stop,
                increment,
            } => {
                validate_name("source", source)?;
                finite(&[("start", *start), ("stop", *stop), ("increment", *increment)])?;
                if *increment == 0.0 {
                    return Err(invalid("dc increment must be non-zero"));
                }
                Ok(())
            }
            AnalysisRequest::AcSweep {
                mode,
                points,
                fstart,
                fstop,
            } => validate_sweep(*mode, *points, *fstart, *fstop),
            AnalysisRequest::Noise {
                output,
                source,
                mode,
                points,
                fstart,
                fstop,
            } => {
                validate_name("output node", output)?;
                validate_name("source", source)?;
                validate_sweep(*mode, *points, *fstart, *fstop)
            }
        }
    }

    /// Background command string in the engine's positional syntax
    pub fn background_command(&self) -> String {
        match self {
            AnalysisRequest::Run => "bg_run".to_string(),
            AnalysisRequest::OperatingPoint => "bg_op".to_string(),
            AnalysisRequest::Transient { step, stop, start } => {
                format!("bg_tran {} {} {}", num(*step), num(*stop), num(*start))
            }
            AnalysisRequest::DcSweep {
                source,
                start,
                stop,
                increment,
            } => format!(
                "bg_dc {} {} {} {}",
                source,
                num(*start),
                num(*stop),
                num(*increment)
            ),
            AnalysisRequest::AcSweep {
                mode,
                points,
                fstart,
                fstop,
            } => format!(
                "bg_ac {} {} {} {}",
                mode.keyword(),
                points,
                num(*fstart),
                num(*fstop)
            ),
            AnalysisRequest::Noise {
                output,
                source,
                mode,
                points,
                fstart,
                fstop,
            } => format!(
                "bg_noise {} {} {} {} {} {}",
                output,
                source,
                mode.keyword(),
                points,
                num(*fstart),
                num(*fstop)
            ),
        }
    }
}

/// Build the `save` instructions for a vector list.
///
/// An empty list yields no instruction (the engine then saves everything).
/// With `chunk_size`, the list is split into several instructions; they are
/// meant to follow a single [`RESET_SAVES_COMMAND`].
pub fn save_commands<S: AsRef<str>>(vectors: &[S], chunk_size: Option<usize>) -> Result<Vec<String>> {
    for v in vectors {
        validate_name("vector", v.as_ref())?;
    }
    if vectors.is_empty() {
        return Ok(Vec::new());
    }
    let chunk = chunk_size.filter(|n| *n > 0).unwrap_or(vectors.len());
    Ok(vectors
        .chunks(chunk)
        .map(|names| {
            let mut cmd = String::from("save");
            for name in names {
                cmd.push(' ');
                cmd.push_str(name.as_ref());
            }
            cmd
        })
        .collect())
}

/// Format a number so the engine parses it back without losing precision
fn num(value: f64) -> String {
    format!("{:e}", value)
}

fn invalid(msg: impl Into<String>) -> SimError {
    SimError::InvalidRequest(msg.into())
}

fn finite(values: &[(&str, f64)]) -> Result<()> {
    for (name, value) in values {
        if !value.is_finite() {
            return Err(invalid(format!("{} must be finite, got {}", name, value)));
        }
    }
    Ok(())
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(format!("empty {} name", what)));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid(format!("{} name {:?} contains whitespace", what, name)));
    }
    Ok(())
}

fn validate_sweep(mode: SweepMode, points: u32, fstart: f64, fstop: f64) -> Result<()> {
    finite(&[("fstart", fstart), ("fstop", fstop)])?;
    if points == 0 {
        return Err(invalid("sweep needs at least one point"));
    }
    if mode != SweepMode::Linear && fstart <= 0.0 {
        return Err(invalid(format!(
            "{} sweep needs fstart > 0, got {}",
            mode.keyword(),
            fstart
        )));
    }
    if fstop < fstart {
        return Err(invalid(format!(
            "sweep needs fstart <= fstop, got fstart={} fstop={}",
            fstart, fstop
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_commands() {
        assert_eq!(AnalysisRequest::Run.background_command(), "bg_run");
        assert_eq!(AnalysisRequest::OperatingPoint.background_command(), "bg_op");
        assert_eq!(
            AnalysisRequest::Transient {
                step: 1e-6,
                stop: 1e-3,
                start: 0.0
            }
            .background_command(),
            "bg_tran 1e-6 1e-3 0e0"
        );
        assert_eq!(
            AnalysisRequest::DcSweep {
                source: "V1".into(),
                start: 0.0,
                stop: 5.0,
                increment: 0.5
            }
            .background_command(),
            "bg_dc V1 0e0 5e0 5e-1"
        );
        assert_eq!(
            AnalysisRequest::AcSweep {
                mode: SweepMode::Decade,
                points: 10,
                fstart: 1.0,
                fstop: 1e6
            }
            .background_command(),
            "bg_ac dec 10 1e0 1e6"
        );
        assert_eq!(
            AnalysisRequest::Noise {
                output: "v(out)".into(),
                source: "V1".into(),
                mode: SweepMode::Octave,
                points: 5,
                fstart: 10.0,
                fstop: 1e5
            }
            .background_command(),
            "bg_noise v(out) V1 oct 5 1e1 1e5"
        );
    }

    #[test]
    fn test_small_values_keep_precision() {
        let cmd = AnalysisRequest::Transient {
            step: 1e-12,
            stop: 2.5e-9,
            start: 0.0,
        }
        .background_command();
        assert_eq!(cmd, "bg_tran 1e-12 2.5e-9 0e0");
    }

    #[test]
    fn test_save_commands() {
        let none: [&str; 0] = [];
        assert!(save_commands(&none, None).unwrap().is_empty());

        let vectors = ["time", "v(1)", "v(2)", "i(v1)", "v(out)"];
        assert_eq!(
            save_commands(&vectors, None).unwrap(),
            vec!["save time v(1) v(2) i(v1) v(out)"]
        );
        assert_eq!(
            save_commands(&vectors, Some(2)).unwrap(),
            vec!["save time v(1)", "save v(2) i(v1)", "save v(out)"]
        );
    }

    #[test]
    fn test_save_rejects_bad_names() {
        assert!(matches!(
            save_commands(&["v(1)", "v(2) ; quit"], None),
            Err(SimError::InvalidRequest(_))
        ));
        assert!(save_commands(&[""], None).is_err());
        assert!(save_commands(&["v(1)\nquit"], None).is_err());
    }

    #[test]
    fn test_validation() {
        let bad = [
            AnalysisRequest::Transient {
                step: 0.0,
                stop: 1e-3,
                start: 0.0,
            },
            AnalysisRequest::Transient {
                step: 1e-6,
                stop: 1e-3,
                start: 2e-3,
            },
            AnalysisRequest::Transient {
                step: f64::NAN,
                stop: 1e-3,
                start: 0.0,
            },
            AnalysisRequest::DcSweep {
                source: "V1".into(),
                start: 0.0,
                stop: 1.0,
                increment: 0.0,
            },
            AnalysisRequest::AcSweep {
                mode: SweepMode::Decade,
                points: 10,
                fstart: 0.0,
                fstop: 1e3,
            },
            AnalysisRequest::AcSweep {
                mode: SweepMode::Linear,
                points: 0,
                fstart: 1.0,
                fstop: 1e3,
            },
            AnalysisRequest::Noise {
                output: "".into(),
                source: "V1".into(),
                mode: SweepMode::Decade,
                points: 10,
                fstart: 1.0,
                fstop: 1e3,
            },
        ];
        for request in bad {
            assert!(request.validate().is_err(), "{:?} should be rejected", request);
        }

        assert!(AnalysisRequest::AcSweep {
            mode: SweepMode::Linear,
            points: 100,
            fstart: 0.0,
            fstop: 1e3,
        }
        .validate()
        .is_ok());
        assert!(AnalysisRequest::DcSweep {
            source: "V1".into(),
            start: 5.0,
            stop: 0.0,
            increment: -0.5,
        }
        .validate()
        .is_ok());
    }
}
