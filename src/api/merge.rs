//! Delta Merging
//!
//! Folds successive [`StreamDelta`]s into one logical result. Per choice index,
//! text and function-call fragments are concatenated in arrival order, role is
//! replaced by the latest non-empty value and a finish reason never reverts to
//! unset once seen.

use crate::api::streaming::{ChoiceDelta, StreamDelta};
use crate::engine::ChatProgress;

/// Concatenate two optional fragments; an absent or empty side is the identity.
pub fn concat_strings(current: Option<&str>, new: Option<&str>) -> Option<String> {
    match (current, new) {
        (current, None) | (current, Some("")) => current.map(str::to_owned),
        (None, Some(new)) | (Some(""), Some(new)) => Some(new.to_owned()),
        (Some(current), Some(new)) => Some(format!("{current}{new}")),
    }
}

fn concat_into(target: &mut Option<String>, new: Option<&str>) {
    *target = concat_strings(target.as_deref(), new);
}

fn merge_choice(result: &mut ChoiceDelta, incoming: &ChoiceDelta) {
    let delta = &mut result.delta;
    let new_delta = &incoming.delta;

    if new_delta.role.is_some() {
        delta.role = new_delta.role;
    }

    concat_into(&mut delta.content, new_delta.content.as_deref());

    if let Some(new_call) = &new_delta.function_call {
        match &mut delta.function_call {
            None => delta.function_call = Some(new_call.clone()),
            Some(call) => {
                concat_into(&mut call.name, new_call.name.as_deref());
                concat_into(&mut call.arguments, new_call.arguments.as_deref());
            }
        }
    }

    if incoming.finish_reason.is_some() {
        result.finish_reason = incoming.finish_reason;
    }
}

/// Merge `incoming` into `current`, returning a new accumulated result.
///
/// With no accumulator yet, `incoming` is copied verbatim (an empty
/// function-call increment is normalized to absent). Choices not yet in the
/// accumulator are appended and the list is re-sorted by index.
pub fn merge_chat_stream_deltas(current: Option<&StreamDelta>, incoming: &StreamDelta) -> StreamDelta {
    let Some(current) = current else {
        let mut cloned = incoming.clone();
        for choice in &mut cloned.choices {
            if choice
                .delta
                .function_call
                .as_ref()
                .is_some_and(|call| call.is_empty())
            {
                choice.delta.function_call = None;
            }
        }
        return cloned;
    };

    let mut result = current.clone();

    for new_choice in &incoming.choices {
        match result
            .choices
            .iter_mut()
            .find(|choice| choice.index == new_choice.index)
        {
            Some(existing) => merge_choice(existing, new_choice),
            None => {
                result.choices.push(new_choice.clone());
                result.choices.sort_by_key(ChoiceDelta::sort_key);
            }
        }
    }

    if incoming.usage.is_some() {
        result.usage = incoming.usage.clone();
    }

    result
}

/// True once every choice carries a finish reason.
pub fn all_choices_finished(delta: &StreamDelta) -> bool {
    delta
        .choices
        .iter()
        .all(|choice| choice.finish_reason.is_some())
}

/// Caller-side accumulator for chat progress events.
///
/// A retried attempt starts a fresh response, so the accumulator starts over
/// whenever it sees a new attempt number.
#[derive(Debug, Default, Clone)]
pub struct DeltaAccumulator {
    attempt: u32,
    result: Option<StreamDelta>,
}

impl DeltaAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one progress event into the accumulated result
    pub fn push(&mut self, progress: &ChatProgress) -> &StreamDelta {
        if progress.attempt != self.attempt {
            self.attempt = progress.attempt;
            self.result = None;
        }

        let merged = merge_chat_stream_deltas(self.result.as_ref(), &progress.delta);
        self.result.insert(merged)
    }

    /// Attempt the current result belongs to
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn result(&self) -> Option<&StreamDelta> {
        self.result.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.result.as_ref().is_some_and(all_choices_finished)
    }

    pub fn into_result(self) -> Option<StreamDelta> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::completion::Role;
    use crate::api::streaming::{DeltaMessage, FinishReason, FunctionCallDelta};

    fn base_delta(choices: Vec<ChoiceDelta>) -> StreamDelta {
        StreamDelta {
            id: "1".to_string(),
            object: "baseDelta".to_string(),
            created: 1,
            model: "baseModel".to_string(),
            choices,
            usage: None,
        }
    }

    fn text_choice(index: u32, content: &str, finish_reason: Option<FinishReason>) -> ChoiceDelta {
        ChoiceDelta {
            index: Some(index),
            delta: DeltaMessage {
                role: None,
                content: Some(content.to_string()),
                function_call: None,
            },
            finish_reason,
        }
    }

    #[test]
    fn test_concat_strings_identity() {
        assert_eq!(concat_strings(None, Some("new")), Some("new".to_string()));
        assert_eq!(concat_strings(Some("current"), None), Some("current".to_string()));
        assert_eq!(concat_strings(Some(""), Some("new")), Some("new".to_string()));
        assert_eq!(concat_strings(Some("current"), Some("")), Some("current".to_string()));
        assert_eq!(
            concat_strings(Some("current"), Some("new")),
            Some("currentnew".to_string())
        );
        assert_eq!(concat_strings(None, None), None);
    }

    #[test]
    fn test_first_merge_copies_choice() {
        let choice = ChoiceDelta {
            index: Some(0),
            delta: DeltaMessage {
                role: Some(Role::Assistant),
                content: Some("Hi".to_string()),
                function_call: Some(FunctionCallDelta::default()),
            },
            finish_reason: None,
        };

        let result = merge_chat_stream_deltas(None, &base_delta(vec![choice.clone()]));

        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.choices[0].delta.function_call, None);
        assert_eq!(result.choices[0].delta.content, choice.delta.content);
        assert_eq!(result.choices[0].delta.role, choice.delta.role);
    }

    #[test]
    fn test_adds_new_choices_to_the_current_choices() {
        let input = base_delta(vec![ChoiceDelta {
            index: Some(1),
            delta: DeltaMessage::default(),
            finish_reason: None,
        }]);

        let result = merge_chat_stream_deltas(Some(&base_delta(vec![])), &input);
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.choices[0], input.choices[0]);
    }

    #[test]
    fn test_merges_role_content_and_function_call() {
        let current = ChoiceDelta {
            index: Some(1),
            delta: DeltaMessage {
                role: Some(Role::Assistant),
                content: Some("Hello, ".to_string()),
                function_call: Some(FunctionCallDelta {
                    name: Some("func1".to_string()),
                    arguments: None,
                }),
            },
            finish_reason: None,
        };
        let incoming = ChoiceDelta {
            index: Some(1),
            delta: DeltaMessage {
                role: Some(Role::Assistant),
                content: Some("I'm well.".to_string()),
                function_call: Some(FunctionCallDelta {
                    name: None,
                    arguments: Some("arg1".to_string()),
                }),
            },
            finish_reason: Some(FinishReason::Stop),
        };

        let result = merge_chat_stream_deltas(
            Some(&base_delta(vec![current])),
            &base_delta(vec![incoming]),
        );
        let merged = result.choices.iter().find(|c| c.index == Some(1)).unwrap();

        assert_eq!(merged.delta.role, Some(Role::Assistant));
        assert_eq!(merged.delta.content.as_deref(), Some("Hello, I'm well."));
        assert_eq!(
            merged.delta.function_call,
            Some(FunctionCallDelta {
                name: Some("func1".to_string()),
                arguments: Some("arg1".to_string()),
            })
        );
        assert_eq!(merged.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_choices_stay_sorted_by_index() {
        let mut acc = merge_chat_stream_deltas(None, &base_delta(vec![text_choice(2, "c", None)]));
        acc = merge_chat_stream_deltas(Some(&acc), &base_delta(vec![text_choice(0, "a", None)]));
        acc = merge_chat_stream_deltas(Some(&acc), &base_delta(vec![text_choice(1, "b", None)]));
        acc = merge_chat_stream_deltas(Some(&acc), &base_delta(vec![text_choice(0, "a", None)]));

        let indexes: Vec<_> = acc.choices.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(acc.choices[0].delta.content.as_deref(), Some("aa"));
    }

    #[test]
    fn test_finish_reason_never_reverts() {
        let mut acc = merge_chat_stream_deltas(
            None,
            &base_delta(vec![text_choice(0, "done", Some(FinishReason::Length))]),
        );
        acc = merge_chat_stream_deltas(Some(&acc), &base_delta(vec![text_choice(0, "", None)]));
        assert_eq!(acc.choices[0].finish_reason, Some(FinishReason::Length));
    }

    #[test]
    fn test_all_choices_finished() {
        let mut acc = merge_chat_stream_deltas(
            None,
            &base_delta(vec![text_choice(0, "a", None), text_choice(1, "b", None)]),
        );
        assert!(!all_choices_finished(&acc));

        acc = merge_chat_stream_deltas(
            Some(&acc),
            &base_delta(vec![text_choice(0, "", Some(FinishReason::Stop))]),
        );
        assert!(!all_choices_finished(&acc));

        acc = merge_chat_stream_deltas(
            Some(&acc),
            &base_delta(vec![text_choice(1, "", Some(FinishReason::Stop))]),
        );
        assert!(all_choices_finished(&acc));
    }

    #[test]
    fn test_merge_is_chunking_independent() {
        let deltas: Vec<StreamDelta> = ["Hel", "lo", ", wor", "ld"]
            .iter()
            .map(|s| base_delta(vec![text_choice(0, s, None)]))
            .collect();

        let sequential = deltas
            .iter()
            .fold(None, |acc: Option<StreamDelta>, d| {
                Some(merge_chat_stream_deltas(acc.as_ref(), d))
            })
            .unwrap();

        let left = merge_chat_stream_deltas(Some(&deltas[0]), &deltas[1]);
        let right = merge_chat_stream_deltas(Some(&deltas[2]), &deltas[3]);
        let grouped = merge_chat_stream_deltas(Some(&left), &right);

        assert_eq!(sequential, grouped);
        assert_eq!(sequential.first_content(), Some("Hello, world"));
    }

    #[test]
    fn test_accumulator_restarts_on_new_attempt() {
        let mut acc = DeltaAccumulator::new();
        acc.push(&ChatProgress {
            attempt: 1,
            delta: base_delta(vec![text_choice(0, "stale", None)]),
        });
        acc.push(&ChatProgress {
            attempt: 2,
            delta: base_delta(vec![text_choice(0, "fresh", None)]),
        });
        let result = acc.push(&ChatProgress {
            attempt: 2,
            delta: base_delta(vec![text_choice(0, " text", Some(FinishReason::Stop))]),
        });

        assert_eq!(result.first_content(), Some("fresh text"));
        assert_eq!(acc.attempt(), 2);
        assert!(acc.is_finished());
    }
}
