//! Prompt text sent to the chat provider.

use crate::persona::Persona;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

pub const PERSONALITY_SYSTEM_LINE: &str =
    "You are a creative AI that generates unique and engaging personalities for objects.";

pub const ANALYSIS_SYSTEM_LINE: &str =
    "You analyze content and suggest personas that could be built from it.";

pub fn personality_prompt(object_name: &str, image_description: &str) -> String {
    format!(
        "Create a detailed system prompt for an AI that gives {object} a unique personality.\n\
         The AI should have a distinct voice, mannerisms, and backstory that fits {object}.\n\
         \n\
         Here's a description of the {object}:\n\
         {description}\n\
         \n\
         Your response should ONLY include the system prompt content, without any additional text or formatting.\n\
         The prompt should be in the second person (\"You are...\") and describe the AI's personality,\n\
         communication style, and any special knowledge or abilities it has.\n\
         \n\
         Example format (but make it unique to {object}):\n\
         \"You are a {object} with a quirky personality. You love to [describe personality traits]...\"",
        object = object_name,
        description = image_description,
    )
}

/// The system message that opens a conversation with `persona`.
///
/// A stored system prompt wins; otherwise one is composed from the traits.
pub fn persona_system_prompt(persona: &Persona) -> String {
    if let Some(prompt) = persona
        .traits
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        return prompt.to_string();
    }

    let traits = &persona.traits;
    let mut prompt = format!("You are {}. {}", persona.name.trim(), persona.description.trim());
    if !traits.personality.trim().is_empty() {
        prompt.push_str(&format!("\nPersonality: {}", traits.personality.trim()));
    }
    if !traits.interests.is_empty() {
        prompt.push_str(&format!("\nInterests: {}", traits.interests.join(", ")));
    }
    if !traits.communication_style.trim().is_empty() {
        prompt.push_str(&format!(
            "\nCommunication style: {}",
            traits.communication_style.trim()
        ));
    }
    if !traits.knowledge_domain.trim().is_empty() {
        prompt.push_str(&format!("\nKnowledge: {}", traits.knowledge_domain.trim()));
    }
    prompt.push_str("\nStay in character for the whole conversation.");
    prompt
}

pub fn analysis_prompt(content: &str) -> String {
    format!(
        "Analyze the following content and describe the persona it suggests: \
         personality, interests, communication style and knowledge domain.\n\nContent:\n{}",
        content.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaTraits;
    use chrono::Utc;

    fn persona(system_prompt: Option<&str>) -> Persona {
        Persona {
            id: "p1".to_string(),
            name: "Mugsy".to_string(),
            description: "A chipped coffee mug.".to_string(),
            traits: PersonaTraits {
                personality: "grumpy before noon".to_string(),
                interests: vec!["espresso".to_string(), "desks".to_string()],
                communication_style: "terse".to_string(),
                knowledge_domain: "coffee".to_string(),
                system_prompt: system_prompt.map(str::to_string),
            },
            image_base64: None,
            object_name: Some("coffee mug".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn stored_system_prompt_is_used_verbatim() {
        assert_eq!(
            persona_system_prompt(&persona(Some("You are a mug."))),
            "You are a mug."
        );
    }

    #[test]
    fn traits_compose_a_prompt_when_none_is_stored() {
        let prompt = persona_system_prompt(&persona(Some("   ")));
        assert!(prompt.starts_with("You are Mugsy. A chipped coffee mug."));
        assert!(prompt.contains("Interests: espresso, desks"));
        assert!(prompt.contains("Communication style: terse"));
    }

    #[test]
    fn personality_prompt_mentions_object_and_description() {
        let prompt = personality_prompt("teapot", "A short and stout teapot");
        assert!(prompt.contains("gives teapot a unique personality"));
        assert!(prompt.contains("A short and stout teapot"));
    }
}
