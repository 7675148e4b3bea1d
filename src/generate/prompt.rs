//! Prompt templates sent to each provider.

use super::provider::Provider;

const GEMINI_GUIDELINES: &[&str] = &[
    "Use functional components and hooks where appropriate.",
    "Implement Tailwind CSS (version 3.x) for styling. Use utility classes efficiently.",
    "Ensure the design is responsive and works well on mobile, tablet, and desktop.",
    "Include appropriate accessibility attributes (aria-labels, roles, etc.).",
    "Use semantic HTML elements where possible.",
    "Add brief comments to explain any complex logic or structure.",
    "Do not include any import statements or export declarations.",
    "Utilize Tailwind's color palette, especially focusing on pastel shades for primary elements and darker shades for neutral tones.",
    "Implement hover and focus states for interactive elements.",
    "Use Tailwind's built-in animations and transitions for subtle UI enhancements.",
];

const COMPONENT_GUIDELINES: &[&str] = &[
    "Return basic UI code only, just the design bit, not the state and hooks.",
    "Define a single functional component named 'Component'.",
    "Use Tailwind CSS for styling. Use dark backgrounds and light shades of text consistently.",
    "Ensure the design is responsive for mobile, tablet, and desktop.",
    "Include appropriate accessibility attributes.",
    "Use semantic HTML elements where possible.",
    "Implement hover and focus states for interactive elements.",
    "Use bg-black/bg-blue/or of the format bg-[hexcode] for backgrounds.",
    "For icons, use inline SVG code from Lucide React icons.",
    "Keep the code concise, aiming for no more than 150-175 lines.",
    "Add brief comments to explain any complex logic or structure.",
    "Ensure all JSX is properly closed and nested.",
    "Don't use external libraries or import statements.",
];

const EXPERT_ROLE: &str = "You are a UI/UX expert, specializing in javascript and tailwind css.";

const LLAMA_EXTRA: &[&str] = &[
    "Use native elements like button, div, h1, h2, p, span.",
    "Just give the code, with no greetings, opening sentences or explanations before or after it.",
];

const EXAMPLE_STRUCTURE: &str = "Example structure:
const Component = () => {
  return (
    <div>
      {/* Component JSX here */}
    </div>
  );
};";

/// Builds the full prompt for `provider` around the user's request.
pub fn build_prompt(provider: Provider, user_prompt: &str) -> String {
    let request = user_prompt.trim().replace('"', "'");
    let mut guidelines: Vec<&str> = Vec::new();
    let closing = match provider {
        Provider::Gemini => {
            guidelines.extend_from_slice(GEMINI_GUIDELINES);
            "Only output the JSX code for the component. Ensure the code is clean, well-formatted, and follows React best practices."
        }
        Provider::Claude => {
            guidelines.extend_from_slice(COMPONENT_GUIDELINES);
            "Provide only the component code, no additional explanations."
        }
        Provider::Gpt => {
            guidelines.push(EXPERT_ROLE);
            guidelines.extend_from_slice(COMPONENT_GUIDELINES);
            "Provide only the component code, no additional explanations."
        }
        Provider::Llama => {
            guidelines.push(EXPERT_ROLE);
            guidelines.extend_from_slice(COMPONENT_GUIDELINES);
            guidelines.extend_from_slice(LLAMA_EXTRA);
            "Provide only the component code, no additional explanations."
        }
    };

    let mut prompt = format!(
        "Create a modern, responsive React component using the following requirements:\n\
         User's request: \"{}\"\n\
         Guidelines:\n",
        request
    );
    for (i, line) in guidelines.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, line));
    }
    if provider == Provider::Llama {
        prompt.push_str(EXAMPLE_STRUCTURE);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(closing);
    prompt
}
