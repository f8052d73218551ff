use minijinja::{context, Environment};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");

/// Render the persona instruction for the reply model, parameterized with
/// the visitor's first name. Falls back to a handwritten prompt if the
/// template fails to render.
pub fn render_system_prompt(visitor_name: &str) -> String {
    let visitor_name = if visitor_name.trim().is_empty() {
        "there"
    } else {
        visitor_name.trim()
    };

    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(visitor_name);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(visitor_name);
    };

    template
        .render(context! { visitor_name => visitor_name })
        .unwrap_or_else(|_| fallback_system_prompt(visitor_name))
}

fn fallback_system_prompt(visitor_name: &str) -> String {
    format!(
        "You are Clara, the website assistant for ClearClaim Billing Solutions, \
         a medical-billing services company. You are chatting with {visitor_name}.\n\
         Only discuss ClearClaim and medical-billing topics. Keep answers to a few \
         short plain-text sentences, never invent prices, and point visitors to \
         (877) 555-0119 or support@clearclaimbilling.com for anything you cannot answer."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_visitor_name() {
        let prompt = render_system_prompt("Alex");
        assert!(prompt.contains("Alex"));
        assert!(prompt.contains("ClearClaim"));
    }

    #[test]
    fn blank_name_gets_neutral_greeting() {
        let prompt = render_system_prompt("   ");
        assert!(prompt.contains("there"));
    }
}
