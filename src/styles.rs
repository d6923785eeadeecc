/// Canonical style set used when a request supplies no styles of its own.
pub const DEFAULT_STYLES: [&str; 4] = ["professional", "casual", "polite", "social-media"];

const PROFESSIONAL: &str = "You are an expert English writer. Rewrite the following text in a \
     professional, clear, and concise manner. Always respond in English, regardless of the input \
     language. Do not translate, but rewrite in a professional tone. Do not include explanations \
     or preambles. Only output the rewritten text.";

const CASUAL: &str = "You are an expert English writer. Rewrite the following text in a friendly, \
     casual, and approachable tone. Always respond in English, regardless of the input language. \
     Do not translate, but rewrite in a casual tone. Do not include explanations or preambles. \
     Only output the rewritten text.";

const POLITE: &str = "You are an expert English writer. Rewrite the following text in a courteous, \
     respectful, and polite tone. Always respond in English, regardless of the input language. \
     Do not translate, but rewrite in a polite tone. Do not include explanations or preambles. \
     Only output the rewritten text.";

const SOCIAL_MEDIA: &str = "You are an expert English copywriter for social media. Rewrite the \
     following text to be catchy, brief, and engaging for social media audiences. Always respond \
     in English, regardless of the input language. Do not translate, but rewrite for social media. \
     Do not include explanations or preambles. Only output the rewritten text.";

/// Maps a style name to the system instruction used for generation. Unknown
/// styles fall back to the professional profile instead of failing.
pub fn resolve(style: &str) -> &'static str {
    match style {
        "professional" => PROFESSIONAL,
        "casual" => CASUAL,
        "polite" => POLITE,
        "social-media" => SOCIAL_MEDIA,
        _ => PROFESSIONAL,
    }
}
