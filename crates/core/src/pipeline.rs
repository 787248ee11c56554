//! Argument formatting for the external design pipeline.
//!
//! Turns the structured fields of a [`JobRequest`] into the Hydra-style
//! override strings, benchmark JSON and sweep config the pipeline expects.
//! Everything here is pure string building; the job lifecycle never looks
//! inside the results.

use std::path::Path;

use serde_json::{json, Value};

use crate::job::JobRequest;

/// Benchmark key used when the job type is blank.
pub const DEFAULT_BENCH_KEY: &str = "job";

/// File name of the input structure written into each job's output dir.
pub const INPUT_PDB_FILE: &str = "input.pdb";

/// Key under which the overrides are registered in the benchmark JSON.
pub fn bench_key(job_type: &str) -> String {
    let key = job_type.trim();
    if key.is_empty() {
        DEFAULT_BENCH_KEY.to_string()
    } else {
        key.to_string()
    }
}

/// Build the per-job override arguments.
///
/// Quoting follows the pipeline's benchmark files: single quotes inside
/// values are backslash-escaped, contigs lose one layer of surrounding
/// quotes, and active-site blocks with an empty residue or atom list are
/// skipped.
pub fn build_overrides(request: &JobRequest, input_pdb: &Path) -> Vec<String> {
    let ligand = escape_quotes(&request.ligand);
    let contigs = escape_quotes(strip_outer_quotes(&request.contigs));

    let guidepost = if request.job_type.contains("unindexed") {
        "True"
    } else {
        "False"
    };

    let atoms = request
        .active_site_atoms
        .iter()
        .filter(|b| !b.residue.is_empty() && !b.atoms.is_empty())
        .map(|b| format!("\\'{}\\':\\'{}\\'", b.residue, b.atoms))
        .collect::<Vec<_>>()
        .join(",");

    vec![
        format!("inference.input_pdb={}", input_pdb.display()),
        format!("inference.ligand=\\'{ligand}\\'"),
        format!("contigmap.contigs=[\\'{contigs}\\']"),
        format!("inference.contig_as_guidepost={guidepost}"),
        format!("contigmap.contig_atoms=\"'{{{atoms}}}'\""),
    ]
}

/// Benchmark definition mapping `key` to the space-joined overrides.
pub fn benchmark_json(key: &str, overrides: &[String]) -> Value {
    json!({ key: overrides.join(" ") })
}

/// Sweep configuration pointing the pipeline at one benchmark file and
/// writing into `outdir`.
pub fn sweep_config_yaml(bench_json_name: &str, outdir: &Path) -> String {
    let benchmark_line = format!("  benchmark_json: {bench_json_name}");
    let outdir_line = format!("outdir: {}", outdir.display());
    [
        "defaults:",
        "  - enzyme_bench_n41",
        "  - _self_",
        "",
        "in_proc: True",
        "sweep:",
        "  retries: 2",
        "  command_args: >",
        "    --config-name=aa",
        "    inference.deterministic=True",
        "    inference.ckpt_path=REPO_ROOT/rf_diffusion/model_weights/RFD_173.pt",
        "    inference.seed_offset=43",
        "",
        "  num_per_condition: 1",
        "  num_per_job: 1",
        benchmark_line.as_str(),
        "",
        "  slurm:",
        "    p: gpu-bf",
        "    gres: gpu:1",
        "",
        "stop_step: sweep",
        outdir_line.as_str(),
        "",
    ]
    .join("\n")
}

/// Arguments appended after the configured program prefix.
pub fn launch_args(config_name: &str, key: &str) -> Vec<String> {
    vec![
        format!("--config-name={config_name}"),
        format!("sweep.benchmarks={key}"),
        "sweep.slurm.submit=True".to_string(),
        "sweep.slurm.in_proc=True".to_string(),
    ]
}

fn escape_quotes(value: &str) -> String {
    value.replace('\'', "\\'")
}

/// Drop one leading and one trailing `'`. A lone `'` counts as both.
fn strip_outer_quotes(value: &str) -> &str {
    if value.starts_with('\'') && value.ends_with('\'') {
        value.get(1..value.len() - 1).unwrap_or("")
    } else {
        value
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ActiveSiteBlock;

    fn request() -> JobRequest {
        JobRequest {
            job_name: "design".into(),
            job_type: "enzyme_unindexed".into(),
            ligand: "NAI".into(),
            pdb_data: String::new(),
            contigs: "'A1-50,10'".into(),
            active_site_atoms: vec![
                ActiveSiteBlock {
                    residue: "HIS57".into(),
                    atoms: "N,CA,CB".into(),
                },
                ActiveSiteBlock {
                    residue: "ASP102".into(),
                    atoms: String::new(),
                },
            ],
        }
    }

    #[test]
    fn overrides_follow_benchmark_quoting() {
        let args = build_overrides(&request(), Path::new("/work/input.pdb"));
        assert_eq!(
            args,
            [
                "inference.input_pdb=/work/input.pdb",
                r"inference.ligand=\'NAI\'",
                r"contigmap.contigs=[\'A1-50,10\']",
                "inference.contig_as_guidepost=True",
                r#"contigmap.contig_atoms="'{\'HIS57\':\'N,CA,CB\'}'""#,
            ]
        );
    }

    #[test]
    fn indexed_jobs_disable_guidepost() {
        let mut req = request();
        req.job_type = "enzyme".into();
        let args = build_overrides(&req, Path::new("in.pdb"));
        assert_eq!(args[3], "inference.contig_as_guidepost=False");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        let mut req = request();
        req.ligand = "O'X".into();
        let args = build_overrides(&req, Path::new("in.pdb"));
        assert_eq!(args[1], r"inference.ligand=\'O\'X\'");
    }

    #[test]
    fn lone_quote_contigs_become_empty() {
        let mut req = request();
        req.contigs = "'".into();
        let args = build_overrides(&req, Path::new("in.pdb"));
        assert_eq!(args[2], r"contigmap.contigs=[\'\']");

        req.contigs = "A1-50'".into();
        let args = build_overrides(&req, Path::new("in.pdb"));
        assert_eq!(args[2], r"contigmap.contigs=[\'A1-50\'\']");
    }

    #[test]
    fn blank_job_type_uses_default_key() {
        assert_eq!(bench_key("  "), DEFAULT_BENCH_KEY);
        assert_eq!(bench_key(" enzyme "), "enzyme");
    }

    #[test]
    fn benchmark_json_joins_overrides() {
        let value = benchmark_json("enzyme", &["a=1".to_string(), "b=2".to_string()]);
        assert_eq!(value["enzyme"], "a=1 b=2");
    }

    #[test]
    fn sweep_config_points_at_outdir() {
        let yaml = sweep_config_yaml("job-001.json", Path::new("/tmp/job-001_x"));
        assert!(yaml.contains("  benchmark_json: job-001.json\n"));
        assert!(yaml.contains("outdir: /tmp/job-001_x\n"));
    }

    #[test]
    fn launch_args_select_config_and_benchmark() {
        let args = launch_args("job-001", "enzyme");
        assert_eq!(args[0], "--config-name=job-001");
        assert_eq!(args[1], "sweep.benchmarks=enzyme");
    }
}
