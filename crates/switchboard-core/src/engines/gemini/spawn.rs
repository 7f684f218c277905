use crate::engines::{EngineInvocation, LaunchRequest};
use crate::process::PromptDelivery;

/// Build `gemini` arguments for one prompt.
///
/// With stdin delivery there is no `-p`; the CLI runs non-interactively on
/// piped input.
pub fn build_invocation(request: &LaunchRequest<'_>) -> EngineInvocation {
    let mut args = Vec::new();
    let stdin_payload = match request.delivery {
        PromptDelivery::Argument => {
            args.push("-p".to_string());
            args.push(request.prompt.to_string());
            None
        }
        PromptDelivery::Stdin => Some(request.prompt.to_string()),
    };

    args.extend(
        ["--output-format", "stream-json", "--approval-mode", "yolo"]
            .iter()
            .map(|s| s.to_string()),
    );
    if let Some(model) = &request.settings.model {
        args.push("-m".to_string());
        args.push(model.clone());
    }
    if let Some(id) = request.resume {
        args.push("--resume".to_string());
        args.push(id.to_string());
    }
    args.extend(request.settings.extra_args.iter().cloned());

    EngineInvocation {
        args,
        stdin_payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;

    #[test]
    fn argument_delivery_uses_p_flag() {
        let settings = EngineSettings::default();
        let inv = build_invocation(&LaunchRequest {
            prompt: "hello",
            delivery: PromptDelivery::Argument,
            settings: &settings,
            resume: None,
        });
        assert_eq!(&inv.args[..2], &["-p", "hello"]);
        assert!(inv.args.contains(&"yolo".to_string()));
    }

    #[test]
    fn stdin_delivery_omits_p_flag() {
        let settings = EngineSettings {
            model: Some("gemini-2.5-flash".to_string()),
            ..Default::default()
        };
        let inv = build_invocation(&LaunchRequest {
            prompt: "hello",
            delivery: PromptDelivery::Stdin,
            settings: &settings,
            resume: Some("latest"),
        });
        assert!(!inv.args.contains(&"-p".to_string()));
        assert_eq!(inv.stdin_payload.as_deref(), Some("hello"));
        assert!(inv.args.join(" ").contains("-m gemini-2.5-flash"));
        assert!(inv.args.join(" ").contains("--resume latest"));
    }
}
