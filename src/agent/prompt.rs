//! System prompt for the command loop.

use crate::context::Environment;

/// Build the system prompt describing the reply protocol and the machine.
///
/// `extra` is a user-supplied system prompt, appended as additional
/// instructions so it cannot replace the protocol.
pub fn build_system_prompt(env: &Environment, max_steps: u32, extra: Option<&str>) -> String {
    let distro_info = env
        .distro
        .as_ref()
        .map(|d| format!("\nDistro: {}", d))
        .unwrap_or_default();

    let mut prompt = format!(
        r#"You are an autonomous agent operating a shell to accomplish the user's goal.
Every command you request is executed immediately, without confirmation.

Reply with exactly one JSON object and nothing else. No markdown, no prose.
Two replies are valid:

{{"action":"command","command":"<shell command>","comment":"<optional short reason>"}}
{{"action":"finish","summary":"<what was accomplished>"}}

Rules:
- Run one command per reply; you will receive its exit code, stdout and stderr
- Prefer non-interactive commands; nothing can be typed into a running command
- A non-zero exit code is information, not the end: adapt and try again
- Reply with "finish" as soon as the goal is reached or cannot be reached
- You have at most {} command(s)

Context:
OS: {}{}
Shell: {}
CWD: {}"#,
        max_steps,
        env.os,
        distro_info,
        env.shell,
        env.cwd.display()
    );

    if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
        prompt.push_str("\n\nAdditional instructions:\n");
        prompt.push_str(extra);
    }
    prompt
}
