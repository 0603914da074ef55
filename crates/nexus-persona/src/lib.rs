use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

/// Bounded log of switch decisions, retrievable for debugging
/// observability requirement).
const SWITCH_LOG_CAPACITY: usize = 200;

const DEFAULT_PERSONA: &str = "executive-assistant";
const IDENTITY_CONSULTANT_PERSONA: &str = "identity-consultant";

const SIMPLE_GREETINGS: &[&str] = &[
    "hello", "hi", "hey", "yo", "sup", "good morning", "good afternoon", "good evening", "howdy",
];

#[derive(Debug, Clone)]
pub struct ExpertPersona {
    pub id: String,
    pub base: String,
    pub style: String,
    pub focus: String,
    /// Keyword families that bind an explicit "switch to X" phrase to this persona.
    pub keyword_triggers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Lt,
    Gt,
    Eq,
    Includes,
}

#[derive(Debug, Clone)]
pub struct TriggerCondition {
    pub field: String,
    pub op: TriggerOp,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub expert_id: String,
    pub prompt_name: String,
    pub prompt_type: String,
    pub priority: u32,
    pub success_rate: f64,
    pub trigger_conditions: Vec<TriggerCondition>,
    pub prompt_text: String,
    pub is_active: bool,
    /// When true, this is the "specific task" template eligible for the
    /// completeness-based scoring bonus.
    pub is_specific_task: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchDecision {
    pub old_persona: Option<String>,
    pub new_persona: String,
    pub reason: String,
    pub conversation_length: usize,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserProfileSnapshot {
    /// 0.0..=1.0 fraction of profile fields completed.
    pub completeness: f64,
    /// First outstanding business-health issue category, if any.
    pub business_health_issue: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub content: String,
    pub topics: Vec<String>,
}

fn is_simple_greeting(message: &str) -> bool {
    let lowered = message.trim().to_lowercase();
    SIMPLE_GREETINGS
        .iter()
        .any(|g| lowered == *g || lowered.starts_with(&format!("{g} ")) || lowered.starts_with(&format!("{g},")))
}

/// Picks a persona and prompt template per turn and logs every switch
/// decision for later inspection.
pub struct PersonaSelector {
    personas: Vec<ExpertPersona>,
    templates: Vec<PromptTemplate>,
    switch_log: Mutex<VecDeque<SwitchDecision>>,
}

impl PersonaSelector {
    pub fn new(personas: Vec<ExpertPersona>, templates: Vec<PromptTemplate>) -> Self {
        Self {
            personas,
            templates,
            switch_log: Mutex::new(VecDeque::with_capacity(SWITCH_LOG_CAPACITY)),
        }
    }

    /// Seeds the selector with a minimal built-in persona/template set,
    /// grounded in the fixed pacing-rules/default-persona shape
    /// describes. Intended as the out-of-the-box configuration; operators
    /// may register additional personas/templates via `new`.
    pub fn with_defaults() -> Self {
        let personas = vec![
            ExpertPersona {
                id: DEFAULT_PERSONA.to_string(),
                base: "You are an executive assistant: organized, proactive, concise.".to_string(),
                style: "professional".to_string(),
                focus: "general coordination".to_string(),
                keyword_triggers: vec![],
            },
            ExpertPersona {
                id: IDENTITY_CONSULTANT_PERSONA.to_string(),
                base: "You are an identity consultant helping the user complete their profile.".to_string(),
                style: "warm".to_string(),
                focus: "profile completeness".to_string(),
                keyword_triggers: vec!["identity".to_string(), "profile".to_string()],
            },
            ExpertPersona {
                id: "finance-advisor".to_string(),
                base: "You are a finance advisor focused on budgets and spend.".to_string(),
                style: "analytical".to_string(),
                focus: "finance".to_string(),
                keyword_triggers: vec!["finance".to_string(), "budget".to_string(), "billing".to_string()],
            },
        ];
        let templates = vec![PromptTemplate {
            expert_id: DEFAULT_PERSONA.to_string(),
            prompt_name: "default".to_string(),
            prompt_type: "general".to_string(),
            priority: 1,
            success_rate: 0.5,
            trigger_conditions: vec![],
            prompt_text: "Help the user efficiently and ask one clarifying question at a time.".to_string(),
            is_active: true,
            is_specific_task: false,
        }];
        Self::new(personas, templates)
    }

    /// Expert selection rules, evaluated in priority order.
    /// The selector must not switch on the very first turn except for an
    /// explicit switch phrase (case 1).
    pub fn select_expert(
        &self,
        message: &str,
        trailing_window: &[HistoryTurn],
        profile: &UserProfileSnapshot,
        current_persona: Option<&str>,
        conversation_length: usize,
    ) -> (String, SwitchDecision) {
        let is_first_turn = conversation_length == 0;
        let lowered = message.to_lowercase();

        // 1. Explicit switch phrase.
        if let Some(persona) = self.match_explicit_switch(&lowered) {
            return self.decide(current_persona, persona, "explicit switch phrase", conversation_length, vec![]);
        }

        if is_first_turn {
            let fallback = current_persona.unwrap_or(DEFAULT_PERSONA).to_string();
            return self.decide(current_persona, fallback, "first turn, no switch", conversation_length, vec![]);
        }

        // 2. Topic dominance over the trailing window (last 5 messages).
        if let Some((topic, persona)) = self.dominant_topic(trailing_window) {
            return self.decide(
                current_persona,
                persona,
                "topic dominance",
                conversation_length,
                vec![topic],
            );
        }

        // 3. Low profile completeness, not a greeting, enough history.
        let simple_greeting = is_simple_greeting(message);
        if profile.completeness < 0.5 && !simple_greeting && conversation_length >= 3 {
            return self.decide(
                current_persona,
                IDENTITY_CONSULTANT_PERSONA.to_string(),
                "low profile completeness",
                conversation_length,
                vec![],
            );
        }

        // 4. Business-health issue.
        if let Some(issue) = &profile.business_health_issue {
            if let Some(persona) = self.persona_for_keyword(issue) {
                return self.decide(
                    current_persona,
                    persona,
                    format!("business health issue: {issue}"),
                    conversation_length,
                    vec![issue.clone()],
                );
            }
        }

        // 5. Default.
        let fallback = current_persona.unwrap_or(DEFAULT_PERSONA).to_string();
        self.decide(current_persona, fallback, "default persona", conversation_length, vec![])
    }

    /// Among active templates for the chosen persona, score and pick the
    /// winner. Falls back to the persona's `base` text when no template is
    /// active.
    pub fn select_template(&self, persona_id: &str, context: &HashMap<String, Value>) -> Option<&PromptTemplate> {
        let candidates: Vec<&PromptTemplate> = self
            .templates
            .iter()
            .filter(|t| t.expert_id == persona_id && t.is_active)
            .collect();

        candidates
            .into_iter()
            .map(|t| (score_template(t, context), t))
            .max_by(|(score_a, a), (score_b, b)| {
                score_a
                    .partial_cmp(score_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.success_rate.partial_cmp(&b.success_rate).unwrap_or(std::cmp::Ordering::Equal))
                    .then(a.priority.cmp(&b.priority))
            })
            .map(|(_, t)| t)
    }

    pub fn persona(&self, id: &str) -> Option<&ExpertPersona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Clones the registered persona set — used by callers deriving topic
    /// labels from keyword triggers without reaching into selector internals.
    pub fn personas_snapshot(&self) -> Vec<ExpertPersona> {
        self.personas.clone()
    }

    /// Assembles the final system prompt: template text (or persona base),
    /// fixed pacing rules, rendered context block, optional persona tail.
    pub fn assemble_prompt(&self, persona_id: &str, context: &HashMap<String, Value>, context_block: &str) -> String {
        let persona = self.persona(persona_id);
        let body = self
            .select_template(persona_id, context)
            .map(|t| t.prompt_text.clone())
            .or_else(|| persona.map(|p| p.base.clone()))
            .unwrap_or_else(|| "Assist the user.".to_string());

        let pacing = "Conversation pacing rules: ask one question at a time; briefly acknowledge what the user said; be concise.";
        let tail = persona.map(|p| format!("Stay focused on: {}.", p.focus)).unwrap_or_default();

        format!("{body}\n\n{pacing}\n\nCurrent context:\n{context_block}\n\n{tail}")
            .trim_end()
            .to_string()
    }

    pub fn recent_switch_decisions(&self) -> Vec<SwitchDecision> {
        self.switch_log.lock().unwrap().iter().cloned().collect()
    }

    fn decide(
        &self,
        current: Option<&str>,
        new_persona: impl Into<String>,
        reason: impl Into<String>,
        conversation_length: usize,
        topics: Vec<String>,
    ) -> (String, SwitchDecision) {
        let new_persona = new_persona.into();
        let decision = SwitchDecision {
            old_persona: current.map(String::from),
            new_persona: new_persona.clone(),
            reason: reason.into(),
            conversation_length,
            topics,
        };
        let mut log = self.switch_log.lock().unwrap();
        if log.len() >= SWITCH_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(decision.clone());
        (new_persona, decision)
    }

    fn match_explicit_switch(&self, lowered_message: &str) -> Option<String> {
        let has_switch_phrase = ["switch to", "use the", "i need", "i want"]
            .iter()
            .any(|p| lowered_message.contains(p));
        if !has_switch_phrase {
            return None;
        }
        self.persona_for_keyword(lowered_message)
    }

    fn persona_for_keyword(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        self.personas
            .iter()
            .find(|p| p.keyword_triggers.iter().any(|k| lowered.contains(k.as_str())))
            .map(|p| p.id.clone())
    }

    fn dominant_topic(&self, trailing_window: &[HistoryTurn]) -> Option<(String, String)> {
        let window: &[HistoryTurn] = if trailing_window.len() > 5 {
            &trailing_window[trailing_window.len() - 5..]
        } else {
            trailing_window
        };

        let mut counts: HashMap<String, usize> = HashMap::new();
        for turn in window {
            for topic in &turn.topics {
                *counts.entry(topic.clone()).or_insert(0) += 1;
            }
        }

        counts
            .into_iter()
            .filter(|(_, n)| *n >= 3)
            .find_map(|(topic, _)| self.persona_for_keyword(&topic).map(|p| (topic, p)))
    }
}

fn score_template(template: &PromptTemplate, context: &HashMap<String, Value>) -> f64 {
    let mut score = template.priority as f64 * 10.0;

    for cond in &template.trigger_conditions {
        if evaluate_condition(cond, context) {
            score += 50.0;
        }
    }

    if template.success_rate > 0.8 {
        score += 20.0;
    }

    let completeness = context
        .get("profileCompleteness")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    if template.is_specific_task && completeness < 0.7 {
        score += 30.0;
    }

    score
}

fn evaluate_condition(cond: &TriggerCondition, context: &HashMap<String, Value>) -> bool {
    let Some(actual) = context.get(&cond.field) else {
        return false;
    };
    match cond.op {
        TriggerOp::Eq => actual == &cond.value,
        TriggerOp::Includes => match (actual, &cond.value) {
            (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
            (Value::Array(a), b) => a.contains(b),
            _ => false,
        },
        TriggerOp::Lt => match (actual.as_f64(), cond.value.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        TriggerOp::Gt => match (actual.as_f64(), cond.value.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_switch_on_first_turn_without_explicit_phrase() {
        let selector = PersonaSelector::with_defaults();
        let (persona, decision) = selector.select_expert(
            "hello there",
            &[],
            &UserProfileSnapshot::default(),
            None,
            0,
        );
        assert_eq!(persona, DEFAULT_PERSONA);
        assert_eq!(decision.reason, "first turn, no switch");
    }

    #[test]
    fn explicit_switch_phrase_wins_even_on_first_turn() {
        let selector = PersonaSelector::with_defaults();
        let (persona, _) = selector.select_expert(
            "I need help with my budget",
            &[],
            &UserProfileSnapshot::default(),
            None,
            0,
        );
        assert_eq!(persona, "finance-advisor");
    }

    #[test]
    fn low_completeness_switches_to_identity_consultant() {
        let selector = PersonaSelector::with_defaults();
        let profile = UserProfileSnapshot {
            completeness: 0.2,
            business_health_issue: None,
        };
        let (persona, _) = selector.select_expert(
            "what should I do next",
            &[],
            &profile,
            Some(DEFAULT_PERSONA),
            3,
        );
        assert_eq!(persona, IDENTITY_CONSULTANT_PERSONA);
    }

    #[test]
    fn greeting_does_not_trigger_identity_consultant() {
        let selector = PersonaSelector::with_defaults();
        let profile = UserProfileSnapshot {
            completeness: 0.1,
            business_health_issue: None,
        };
        let (persona, _) = selector.select_expert("hey", &[], &profile, Some(DEFAULT_PERSONA), 5);
        assert_eq!(persona, DEFAULT_PERSONA);
    }

    #[test]
    fn template_scoring_prefers_higher_priority_and_success_rate() {
        let personas = vec![ExpertPersona {
            id: "p".into(),
            base: "base".into(),
            style: "s".into(),
            focus: "f".into(),
            keyword_triggers: vec![],
        }];
        let templates = vec![
            PromptTemplate {
                expert_id: "p".into(),
                prompt_name: "low".into(),
                prompt_type: "general".into(),
                priority: 1,
                success_rate: 0.5,
                trigger_conditions: vec![],
                prompt_text: "low".into(),
                is_active: true,
                is_specific_task: false,
            },
            PromptTemplate {
                expert_id: "p".into(),
                prompt_name: "high".into(),
                prompt_type: "general".into(),
                priority: 2,
                success_rate: 0.9,
                trigger_conditions: vec![],
                prompt_text: "high".into(),
                is_active: true,
                is_specific_task: false,
            },
        ];
        let selector = PersonaSelector::new(personas, templates);
        let winner = selector.select_template("p", &HashMap::new()).unwrap();
        assert_eq!(winner.prompt_name, "high");
    }

    #[test]
    fn zero_templates_falls_back_to_persona_base() {
        let personas = vec![ExpertPersona {
            id: "p".into(),
            base: "fallback base text".into(),
            style: "s".into(),
            focus: "f".into(),
            keyword_triggers: vec![],
        }];
        let selector = PersonaSelector::new(personas, vec![]);
        let prompt = selector.assemble_prompt("p", &HashMap::new(), "no context");
        assert!(prompt.contains("fallback base text"));
    }
}
