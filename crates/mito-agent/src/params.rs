//! Per-attempt tool parameters and the deterministic adjustment rules.

use std::collections::BTreeMap;
use std::time::Duration;

use mito_tools::catalog::{lookup, memory_gb, ToolSpec};
use mito_types::{ParamAdjustment, StageView};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptParams {
    pub threads: u32,
    pub memory: String,
    pub timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// Tool-specific parameters (`--careful`, `mode`, `genomeSize`, ...).
    pub extra: BTreeMap<String, Value>,
}

impl AttemptParams {
    /// Starting parameters for `tool`: plan/config values layered over runtime defaults.
    pub fn initial(view: &StageView<'_>, tool: &str, plan_params: &BTreeMap<String, Value>) -> Self {
        let mut params = Self {
            threads: view.config.threads.max(1),
            memory: view.config.memory.clone(),
            timeout_secs: view.config.tool_timeout_secs.max(1),
            max_timeout_secs: view.config.max_tool_timeout_secs.max(1),
            extra: plan_params.clone(),
        };
        for (key, value) in view.tool_params(tool) {
            if let Err(reason) = params.set(&key, value) {
                tracing::warn!(tool, key = %key, "Ignoring configured parameter: {reason}");
            }
        }
        params
    }

    /// Starting parameters for `tool` using the plan's assembler parameters
    /// when the plan chose this tool, plus any user hints the tool accepts.
    pub fn for_tool(view: &StageView<'_>, tool: &str) -> Self {
        let plan_params = view
            .config
            .tool_plan
            .as_ref()
            .filter(|plan| plan.assembler.name.eq_ignore_ascii_case(tool))
            .map(|plan| plan.assembler.params.clone())
            .unwrap_or_default();
        let mut params = Self::initial(view, tool, &plan_params);
        if let Some(spec) = lookup(tool) {
            for (key, value) in &view.inputs.hints {
                if spec.is_adjustable(key) && !params.extra.contains_key(key) {
                    params.extra.insert(key.clone(), value.clone());
                }
            }
        }
        params
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.min(self.max_timeout_secs))
    }

    /// Set one parameter. Values that do not fit are left unapplied and the reason returned.
    fn set(&mut self, key: &str, value: Value) -> std::result::Result<(), String> {
        match key {
            "threads" => {
                if let Some(n) = value.as_u64() {
                    let n = u32::try_from(n).map_err(|_| format!("thread count {n} is out of range"))?;
                    self.threads = n.max(1);
                }
            }
            "timeout" | "timeout_secs" => {
                if let Some(n) = value.as_u64() {
                    self.timeout_secs = n.clamp(1, self.max_timeout_secs);
                }
            }
            "memory" => match value {
                Value::String(s) => self.memory = s,
                Value::Number(n) => self.memory = format!("{n}G"),
                _ => {}
            },
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Apply diagnosis adjustments. Keys outside the tool's allowlist are not
    /// merged; each rejection is returned as a warning.
    pub fn apply(
        &mut self,
        adjustments: &BTreeMap<String, ParamAdjustment>,
        spec: &ToolSpec,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        for (key, adjustment) in adjustments {
            let key = key.as_str();
            if !spec.is_adjustable(key) && key != "timeout_secs" {
                warnings.push(format!(
                    "rejected parameter suggestion '{key}' for {}: not adjustable",
                    spec.id
                ));
                continue;
            }
            match (key, adjustment) {
                ("threads", ParamAdjustment::ReduceHalf) => self.threads = (self.threads / 2).max(1),
                ("threads", ParamAdjustment::Increase) => self.threads = self.threads.saturating_mul(2),
                ("timeout" | "timeout_secs", ParamAdjustment::Increase) => {
                    self.timeout_secs = self.timeout_secs.saturating_mul(2).min(self.max_timeout_secs)
                }
                ("timeout" | "timeout_secs", ParamAdjustment::ReduceHalf) => {
                    self.timeout_secs = (self.timeout_secs / 2).max(1)
                }
                ("memory", ParamAdjustment::Increase) => {
                    self.memory = format!("{}G", memory_gb(&self.memory).saturating_mul(2))
                }
                ("memory", ParamAdjustment::ReduceHalf) => {
                    self.memory = format!("{}G", (memory_gb(&self.memory) / 2).max(1))
                }
                (_, ParamAdjustment::Set(value)) => {
                    if let Err(reason) = self.set(key, value.clone()) {
                        warnings.push(format!("rejected parameter suggestion '{key}' for {}: {reason}", spec.id));
                    }
                }
                (_, op) => match scale(self.extra.get(key), op) {
                    Some(value) => {
                        self.extra.insert(key.to_string(), value);
                    }
                    None => warnings.push(format!(
                        "rejected parameter suggestion '{key}' for {}: no numeric value to adjust",
                        spec.id
                    )),
                },
            }
        }
        warnings
    }
}

fn scale(current: Option<&Value>, op: &ParamAdjustment) -> Option<Value> {
    let n = current?.as_f64()?;
    let scaled = match op {
        ParamAdjustment::ReduceHalf => (n / 2.0).max(1.0),
        ParamAdjustment::Increase => n * 2.0,
        ParamAdjustment::Set(_) => return None,
    };
    if scaled.fract() == 0.0 {
        Some(Value::from(scaled as i64))
    } else {
        Some(Value::from(scaled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mito_types::{PipelineInputs, PipelineState, RuntimeConfig, StageName};
    use serde_json::json;

    fn state() -> PipelineState {
        let mut config = RuntimeConfig::default();
        config.threads = 8;
        config.tool_timeout_secs = 100;
        config.max_tool_timeout_secs = 300;
        config
            .tool_parameters
            .insert("flye".into(), BTreeMap::from([("--iterations".into(), json!(2))]));
        PipelineState::new(PipelineInputs::new("/d/ont.fastq"), config, "/w")
    }

    #[test]
    fn initial_params_layer_config_over_plan() {
        let s = state();
        let plan = BTreeMap::from([("mode".to_string(), json!("ont")), ("--iterations".to_string(), json!(1))]);
        let p = AttemptParams::initial(&s.view(StageName::Assembly), "flye", &plan);
        assert_eq!(p.threads, 8);
        assert_eq!(p.extra["mode"], json!("ont"));
        assert_eq!(p.extra["--iterations"], json!(2));
    }

    #[test]
    fn threads_halve_down_to_one() {
        let s = state();
        let mut p = AttemptParams::initial(&s.view(StageName::Assembly), "flye", &BTreeMap::new());
        let adj = BTreeMap::from([("threads".to_string(), ParamAdjustment::ReduceHalf)]);
        let spec = lookup("flye").unwrap();
        for expected in [4, 2, 1, 1] {
            assert!(p.apply(&adj, spec).is_empty());
            assert_eq!(p.threads, expected);
        }
    }

    #[test]
    fn oversized_thread_count_is_rejected() {
        let s = state();
        let mut p = AttemptParams::initial(&s.view(StageName::Assembly), "flye", &BTreeMap::new());
        let spec = lookup("flye").unwrap();
        let huge = BTreeMap::from([(
            "threads".to_string(),
            ParamAdjustment::Set(json!(u64::from(u32::MAX) + 1)),
        )]);
        let warnings = p.apply(&huge, spec);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("out of range"));
        assert_eq!(p.threads, 8);

        let fits = BTreeMap::from([("threads".to_string(), ParamAdjustment::Set(json!(3)))]);
        assert!(p.apply(&fits, spec).is_empty());
        assert_eq!(p.threads, 3);
    }

    #[test]
    fn timeout_doubles_up_to_cap() {
        let s = state();
        let mut p = AttemptParams::initial(&s.view(StageName::Assembly), "flye", &BTreeMap::new());
        let adj = BTreeMap::from([("timeout".to_string(), ParamAdjustment::Increase)]);
        let spec = lookup("flye").unwrap();
        p.apply(&adj, spec);
        assert_eq!(p.timeout_secs, 200);
        p.apply(&adj, spec);
        assert_eq!(p.timeout_secs, 300);
        assert_eq!(p.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn allowlisted_keys_merge_and_others_are_rejected() {
        let s = state();
        let mut p = AttemptParams::initial(&s.view(StageName::Assembly), "flye", &BTreeMap::new());
        let adj = BTreeMap::from([
            ("--genome-size".to_string(), ParamAdjustment::Set(json!("20k"))),
            ("--output-everything".to_string(), ParamAdjustment::Set(json!(true))),
        ]);
        let warnings = p.apply(&adj, lookup("flye").unwrap());
        assert_eq!(p.extra["--genome-size"], json!("20k"));
        assert!(!p.extra.contains_key("--output-everything"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("--output-everything"));
    }

    #[test]
    fn numeric_tool_params_scale() {
        let s = state();
        let mut p = AttemptParams::initial(&s.view(StageName::Assembly), "flye", &BTreeMap::new());
        let adj = BTreeMap::from([("--iterations".to_string(), ParamAdjustment::Increase)]);
        p.apply(&adj, lookup("flye").unwrap());
        assert_eq!(p.extra["--iterations"], json!(4));
    }

    #[test]
    fn for_tool_uses_plan_params_only_for_the_planned_assembler() {
        let mut s = state();
        s.inputs.hints.insert("--genome-size".into(), json!("16k"));
        s.config.tool_plan = Some(mito_types::ToolPlan {
            qc: vec!["nanoqc".into()],
            assembler: mito_types::AssemblerChoice {
                name: "flye".into(),
                params: BTreeMap::from([("mode".to_string(), json!("ont"))]),
            },
            polishers: vec![],
            candidates: Default::default(),
            extras: Default::default(),
            hints: mito_types::PlanHints {
                kingdom: mito_types::Kingdom::Animal,
                seq_type: mito_types::SeqType::Ont,
                input_formats: vec![],
            },
            warnings: vec![],
        });
        let view = s.view(StageName::Assembly);
        let flye = AttemptParams::for_tool(&view, "flye");
        assert_eq!(flye.extra["mode"], json!("ont"));
        assert_eq!(flye.extra["--genome-size"], json!("16k"));
        let canu = AttemptParams::for_tool(&view, "canu");
        assert!(!canu.extra.contains_key("mode"));
    }

    #[test]
    fn memory_adjustments() {
        let s = state();
        let mut p = AttemptParams::initial(&s.view(StageName::Assembly), "spades", &BTreeMap::new());
        let adj = BTreeMap::from([("memory".to_string(), ParamAdjustment::Increase)]);
        p.apply(&adj, lookup("spades").unwrap());
        assert_eq!(p.memory, "16G");
    }
}
