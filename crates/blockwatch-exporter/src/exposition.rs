//! Prometheus text exposition format (0.0.4).
//!
//! Renders the samples of one scrape for a Prometheus server or compatible
//! agent. Families are written in declaration order, so the output does not
//! depend on the order in which routines happened to finish.

use std::collections::HashMap;
use std::fmt::Write;

use crate::sample::{MetricDesc, Sample};

/// Content type of [`render_prometheus`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render `samples` grouped under `families`.
///
/// Families without samples are left out. Samples for metrics not listed
/// in `families` are dropped.
pub fn render_prometheus(families: &[&MetricDesc], samples: &[Sample]) -> String {
    let mut by_metric: HashMap<&str, Vec<&Sample>> = HashMap::new();
    for sample in samples {
        by_metric.entry(sample.metric.as_str()).or_default().push(sample);
    }

    let mut out = String::new();
    for family in families {
        let Some(samples) = by_metric.get(family.fq_name.as_str()) else {
            continue;
        };

        let _ = writeln!(out, "# HELP {} {}", family.fq_name, escape_help(&family.help));
        let _ = writeln!(out, "# TYPE {} {}", family.fq_name, samples[0].kind.as_str());
        for sample in samples {
            out.push_str(&family.fq_name);
            if !family.labels.is_empty() {
                out.push('{');
                for (i, (name, value)) in family.labels.iter().zip(&sample.labels).enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{name}=\"{}\"", escape_label(value));
                }
                out.push('}');
            }
            let _ = writeln!(out, " {}", format_value(sample.value));
        }
    }
    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::ValueKind;

    fn desc(fq_name: &str, labels: &[&str]) -> MetricDesc {
        MetricDesc {
            name: fq_name.rsplit('_').next().unwrap_or_default().to_string(),
            fq_name: fq_name.to_string(),
            help: format!("Help for {fq_name}."),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn sample(metric: &str, kind: ValueKind, value: f64, labels: &[&str]) -> Sample {
        Sample {
            metric: metric.to_string(),
            kind,
            value,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn render_empty() {
        let volumes = desc("os_cinder_volumes", &[]);
        assert_eq!(render_prometheus(&[&volumes], &[]), "");
    }

    #[test]
    fn render_families_in_declaration_order() {
        let volumes = desc("os_cinder_volumes", &[]);
        let status = desc("os_cinder_volume_status", &["id", "status"]);
        let samples = vec![
            sample("os_cinder_volume_status", ValueKind::Gauge, 1.0, &["v1", "available"]),
            sample("os_cinder_volumes", ValueKind::Gauge, 2.0, &[]),
            sample("os_cinder_volume_status", ValueKind::Gauge, -1.0, &["v2", "odd"]),
        ];

        let output = render_prometheus(&[&volumes, &status], &samples);
        assert_eq!(
            output,
            "# HELP os_cinder_volumes Help for os_cinder_volumes.\n\
             # TYPE os_cinder_volumes gauge\n\
             os_cinder_volumes 2\n\
             # HELP os_cinder_volume_status Help for os_cinder_volume_status.\n\
             # TYPE os_cinder_volume_status gauge\n\
             os_cinder_volume_status{id=\"v1\",status=\"available\"} 1\n\
             os_cinder_volume_status{id=\"v2\",status=\"odd\"} -1\n"
        );
    }

    #[test]
    fn render_counter_type() {
        let state = desc("os_cinder_agent_state", &["hostname"]);
        let samples = vec![sample("os_cinder_agent_state", ValueKind::Counter, 1.0, &["node-1"])];
        let output = render_prometheus(&[&state], &samples);
        assert!(output.contains("# TYPE os_cinder_agent_state counter\n"));
        assert!(output.contains("os_cinder_agent_state{hostname=\"node-1\"} 1\n"));
    }

    #[test]
    fn render_escapes_label_values() {
        let status = desc("os_cinder_volume_status", &["name"]);
        let samples = vec![sample(
            "os_cinder_volume_status",
            ValueKind::Gauge,
            0.0,
            &["a \"quoted\"\\path\nnext"],
        )];
        let output = render_prometheus(&[&status], &samples);
        assert!(output.contains(r#"{name="a \"quoted\"\\path\nnext"} 0"#));
    }

    #[test]
    fn render_special_floats() {
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(100.0), "100");
    }

    #[test]
    fn render_drops_undeclared_samples() {
        let volumes = desc("os_cinder_volumes", &[]);
        let samples = vec![
            sample("os_cinder_volumes", ValueKind::Gauge, 1.0, &[]),
            sample("os_cinder_mystery", ValueKind::Gauge, 1.0, &[]),
        ];
        let output = render_prometheus(&[&volumes], &samples);
        assert!(!output.contains("mystery"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let status = desc("os_cinder_volume_status", &["id"]);
        let volumes = desc("os_cinder_volumes", &[]);
        let samples = vec![
            sample("os_cinder_volumes", ValueKind::Gauge, 3.0, &[]),
            sample("os_cinder_volume_status", ValueKind::Gauge, 5.0, &["v1"]),
        ];
        let output = render_prometheus(&[&volumes, &status], &samples);

        // Every sample line: name[{labels}] value
        for line in output.lines() {
            if line.starts_with('#') {
                continue;
            }
            let (series, value) = line.rsplit_once(' ').unwrap();
            assert!(series.starts_with("os_cinder_"), "{line}");
            assert!(value.parse::<f64>().is_ok(), "{line}");
        }
    }
}
