//! 计划模式库：记录哪些步骤序列 / 步骤类型转移在哪些目标下成功或失败
//!
//! 每次计划结束（成功或失败）时，完整序列与所有长度 2..=3 的连续窗口各自哈希为一个模式键并累加计数；
//! 相邻步骤类型转移另记入全局转移表，用于识别高风险转移。

use std::collections::{BTreeSet, HashMap};

use sha2::{Digest, Sha256};

use crate::plan::{ExecutionPlan, PlanStep, StepType};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "that", "this", "then", "our", "your", "all",
];

/// 目标文本的上下文签名：小写、按非字母数字切分、去短词与停用词
pub fn context_signature(objective: &str) -> BTreeSet<String> {
    objective
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Jaccard 相似度；两边都为空时为 0
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// 步骤类型序列相似度：2·LCS / (|a| + |b|)
pub fn sequence_similarity(a: &[StepType], b: &[StepType]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    2.0 * dp[a.len()][b.len()] as f64 / (a.len() + b.len()) as f64
}

fn normalize_description(description: &str) -> String {
    description
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 模式键：步骤类型 + 规范化描述序列的 SHA-256
pub fn pattern_key(steps: &[PlanStep]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.step_type.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(normalize_description(&step.description).as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// 成功 / 失败计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub success: u32,
    pub failure: u32,
}

impl OutcomeCounts {
    pub fn record(&mut self, success: bool) {
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }

    pub fn total(&self) -> u32 {
        self.success + self.failure
    }

    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.success as f64 / n as f64,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.failure as f64 / n as f64,
        }
    }
}

/// 模式覆盖范围：整份计划，或其中的连续窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternScope {
    Full,
    Window,
}

/// 模式中的一个步骤
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternStep {
    pub step_type: StepType,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct PlanPattern {
    pub key: String,
    pub scope: PatternScope,
    pub steps: Vec<PatternStep>,
    pub counts: OutcomeCounts,
    /// 出现过的目标上下文签名（去重）
    pub contexts: Vec<BTreeSet<String>>,
    /// 本模式内的相邻类型转移统计
    pub transitions: Vec<(StepType, StepType, OutcomeCounts)>,
    pub last_seen: i64,
}

impl PlanPattern {
    pub fn step_types(&self) -> Vec<StepType> {
        self.steps.iter().map(|s| s.step_type).collect()
    }

    pub fn success_rate(&self) -> f64 {
        self.counts.success_rate()
    }

    /// 与给定签名的最大上下文相似度
    pub fn context_similarity(&self, signature: &BTreeSet<String>) -> f64 {
        self.contexts
            .iter()
            .map(|c| jaccard(c, signature))
            .fold(0.0, f64::max)
    }

    fn record_transition(&mut self, from: StepType, to: StepType, success: bool) {
        match self
            .transitions
            .iter_mut()
            .find(|(f, t, _)| *f == from && *t == to)
        {
            Some((_, _, counts)) => counts.record(success),
            None => {
                let mut counts = OutcomeCounts::default();
                counts.record(success);
                self.transitions.push((from, to, counts));
            }
        }
    }
}

/// 计划模式库；由调用方持有并注入到 PlanAdapter
#[derive(Debug, Default)]
pub struct PlanPatternStore {
    patterns: HashMap<String, PlanPattern>,
    transitions: HashMap<(StepType, StepType), OutcomeCounts>,
}

impl PlanPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PlanPattern> {
        self.patterns.get(key)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &PlanPattern> {
        self.patterns.values()
    }

    /// 全局转移统计
    pub fn transition(&self, from: StepType, to: StepType) -> Option<OutcomeCounts> {
        self.transitions.get(&(from, to)).copied()
    }

    /// 记录一次计划执行结果：完整序列 + 长度 2..=3 的所有连续窗口
    pub fn record(&mut self, plan: &ExecutionPlan, success: bool) {
        if plan.steps.is_empty() {
            return;
        }
        let signature = context_signature(&plan.objective);

        let mut ranges = vec![(0, plan.steps.len(), PatternScope::Full)];
        for width in 2..=3 {
            if width >= plan.steps.len() {
                break;
            }
            for start in 0..=plan.steps.len() - width {
                ranges.push((start, start + width, PatternScope::Window));
            }
        }

        for (start, end, scope) in ranges {
            self.record_range(&plan.steps[start..end], scope, &signature, success);
        }

        for pair in plan.steps.windows(2) {
            self.transitions
                .entry((pair[0].step_type, pair[1].step_type))
                .or_default()
                .record(success);
        }
    }

    fn record_range(
        &mut self,
        steps: &[PlanStep],
        scope: PatternScope,
        signature: &BTreeSet<String>,
        success: bool,
    ) {
        let key = pattern_key(steps);
        let pattern = self.patterns.entry(key.clone()).or_insert_with(|| PlanPattern {
            key,
            scope,
            steps: steps
                .iter()
                .map(|s| PatternStep {
                    step_type: s.step_type,
                    description: s.description.clone(),
                })
                .collect(),
            counts: OutcomeCounts::default(),
            contexts: Vec::new(),
            transitions: Vec::new(),
            last_seen: 0,
        });
        // 同一序列既可能作为整份计划也可能作为窗口出现，整份优先
        if scope == PatternScope::Full {
            pattern.scope = PatternScope::Full;
        }
        pattern.counts.record(success);
        if !signature.is_empty() && !pattern.contexts.contains(signature) {
            pattern.contexts.push(signature.clone());
        }
        for pair in steps.windows(2) {
            pattern.record_transition(pair[0].step_type, pair[1].step_type, success);
        }
        pattern.last_seen = chrono::Utc::now().timestamp_millis();
    }
}
