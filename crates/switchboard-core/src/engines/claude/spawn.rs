use crate::engines::{EngineInvocation, LaunchRequest};
use crate::process::PromptDelivery;

/// Build `claude -p` arguments for one prompt.
///
/// Argument delivery passes the prompt as the value of `-p`; stdin delivery
/// leaves `-p` bare and the CLI reads the prompt from standard input.
pub fn build_invocation(request: &LaunchRequest<'_>) -> EngineInvocation {
    let mut args = vec!["-p".to_string()];
    let stdin_payload = match request.delivery {
        PromptDelivery::Argument => {
            args.push(request.prompt.to_string());
            None
        }
        PromptDelivery::Stdin => Some(request.prompt.to_string()),
    };

    args.extend(
        ["--output-format", "stream-json", "--verbose"]
            .iter()
            .map(|s| s.to_string()),
    );
    if let Some(model) = &request.settings.model {
        args.push("--model".to_string());
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
