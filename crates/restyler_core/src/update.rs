use crate::{
    AttemptFailure, DiagnosticEvent, Effect, GenerationState, Msg, Outcome, Strategy,
    TOKEN_CEILING,
};

/// Pure update function: applies a message to state and returns any effects.
///
/// Fallback order is stream, then non-stream, then (only when the requested
/// budget exceeds [`TOKEN_CEILING`]) non-stream with the budget clamped. Only
/// the last attempt in that chain surfaces its failure.
pub fn update(mut state: GenerationState, msg: Msg) -> (GenerationState, Vec<Effect>) {
    if let Msg::Start {
        session_id,
        max_tokens,
    } = msg
    {
        // One state per session; the host cancels whatever ran before.
        state.begin(session_id, max_tokens);
        let effects = vec![
            Effect::Record(DiagnosticEvent::Request {
                strategy: Strategy::Stream,
                max_tokens,
            }),
            Effect::Issue {
                session_id,
                strategy: Strategy::Stream,
                max_tokens,
            },
        ];
        return (state, effects);
    }

    if !state.accepts(msg.session_id()) {
        return (state, Vec::new());
    }
    let session_id = state.session_id();
    let Some(strategy) = state.strategy() else {
        return (state, Vec::new());
    };

    let effects = match msg {
        Msg::Start { .. } => Vec::new(),
        Msg::StreamOpened { .. } => {
            vec![Effect::Record(DiagnosticEvent::ResponseOpened { strategy })]
        }
        Msg::DeltaReceived { text, .. } => {
            if !strategy.is_streaming() || text.is_empty() {
                return (state, Vec::new());
            }
            state.append(&text);
            vec![Effect::Preview {
                session_id,
                accumulated: state.buffer().to_string(),
            }]
        }
        Msg::FrameSkipped { line, error, .. } => {
            vec![Effect::Record(DiagnosticEvent::ParseError { line, error })]
        }
        Msg::StreamEnded { .. } => {
            if !strategy.is_streaming() {
                return (state, Vec::new());
            }
            let content = state.buffer().to_string();
            complete(&mut state, strategy, content)
        }
        Msg::ResponseReceived { content, .. } => {
            if strategy.is_streaming() {
                return (state, Vec::new());
            }
            complete(&mut state, strategy, content)
        }
        Msg::AttemptFailed { failure, .. } => fall_back(&mut state, strategy, failure),
        Msg::Cancelled { .. } => {
            let phase = state.phase();
            state.finish(Outcome::Aborted);
            vec![
                Effect::Record(DiagnosticEvent::Aborted { phase }),
                Effect::Abort { session_id },
            ]
        }
    };

    (state, effects)
}

fn complete(state: &mut GenerationState, strategy: Strategy, content: String) -> Vec<Effect> {
    let session_id = state.session_id();
    state.finish(Outcome::Completed(content.clone()));
    vec![
        Effect::Record(DiagnosticEvent::Completed {
            strategy,
            content: content.clone(),
        }),
        Effect::Complete {
            session_id,
            content,
        },
    ]
}

fn fall_back(
    state: &mut GenerationState,
    strategy: Strategy,
    failure: AttemptFailure,
) -> Vec<Effect> {
    let session_id = state.session_id();
    let requested = state.requested_max_tokens();
    let next = match strategy {
        Strategy::Stream => Some((Strategy::NonStream, requested)),
        Strategy::NonStream if requested > TOKEN_CEILING => {
            Some((Strategy::NonStreamReducedTokens, TOKEN_CEILING))
        }
        Strategy::NonStream | Strategy::NonStreamReducedTokens => None,
    };

    let mut effects = vec![Effect::Record(DiagnosticEvent::AttemptFailed {
        strategy,
        failure: failure.clone(),
    })];

    match next {
        Some((to, max_tokens)) => {
            state.enter(to);
            effects.push(Effect::Record(DiagnosticEvent::Fallback {
                from: strategy,
                to,
                max_tokens,
                requested_max_tokens: requested,
            }));
            effects.push(Effect::Issue {
                session_id,
                strategy: to,
                max_tokens,
            });
        }
        None => {
            let message = failure.describe();
            state.finish(Outcome::Failed(message.clone()));
            effects.push(Effect::Record(DiagnosticEvent::Surfaced {
                message: message.clone(),
            }));
            effects.push(Effect::Fail {
                session_id,
                message,
            });
        }
    }
    effects
}
