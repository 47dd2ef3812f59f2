/// A visual direction offered to the user, with the prompt fragment that
/// steers the generator toward it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePreset {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

pub const DEFAULT_STYLE_ID: &str = "NATURAL";

pub const STYLE_PRESETS: &[StylePreset] = &[
    StylePreset {
        id: "NATURAL",
        label: "Natural / Auto",
        description: "Let the product define the aesthetic.",
        prompt: "that naturally complements the product features and context.",
    },
    StylePreset {
        id: "MINIMALIST",
        label: "Studio Minimal",
        description: "Clean lines, soft light, negative space.",
        prompt: "in a high-end minimalist studio aesthetic. Use clean lines, soft natural lighting, neutral backgrounds (white, beige, grey), and negative space. Focus on pure product photography with subtle shadows.",
    },
    StylePreset {
        id: "RIVIERA",
        label: "Coastal Riviera",
        description: "Sun-drenched, organic textures, warm tones.",
        prompt: "in a luxury coastal Riviera aesthetic. Incorporate warm sunlight, stone textures, organic elements, dry florals, and a relaxed, sun-drenched atmosphere.",
    },
    StylePreset {
        id: "METRO",
        label: "Urban Metro",
        description: "Concrete, glass, modern architecture.",
        prompt: "in a modern urban aesthetic. Use concrete textures, glass architectural elements, sharp daylight, and city shadows. Sophisticated and street-smart.",
    },
    StylePreset {
        id: "EDITORIAL",
        label: "Bold Editorial",
        description: "Dramatic angles, high contrast, avant-garde.",
        prompt: "in a bold fashion editorial aesthetic. Use dramatic lighting, high contrast, unusual angles, and avant-garde compositions reminiscent of high-end fashion magazines.",
    },
    StylePreset {
        id: "VINTAGE",
        label: "Retro Film",
        description: "Analog grain, warm wash, nostalgic.",
        prompt: "in a vintage analog film aesthetic. Simulate 35mm film grain, warm color washes, light leaks, and a nostalgic 1970s or 1980s high-fashion vibe.",
    },
    StylePreset {
        id: "HERITAGE",
        label: "Timeless Heritage",
        description: "Old money, rich textures, classic luxury.",
        prompt: "in a classic \"old money\" heritage aesthetic. Incorporate rich textures like dark wood, leather, velvet, and marble. Use traditional lighting and a sophisticated, aristocratic atmosphere.",
    },
    StylePreset {
        id: "NOIR",
        label: "Cinematic Noir",
        description: "Dramatic shadows, monochrome elegance.",
        prompt: "in a dramatic film noir aesthetic. Use high-contrast chiaroscuro lighting, deep shadows, and a monochromatic or desaturated palette. Moody, cinematic, and sharp.",
    },
    StylePreset {
        id: "ETHEREAL",
        label: "Soft Dreamscape",
        description: "Hazy, romantic, silk and light.",
        prompt: "in an ethereal, romantic aesthetic. Use soft-focus lenses, diffusion filters, warm pastel tones (cream, blush, champagne), and dreamlike lighting. Incorporate elements like silk, tulle, or soft floral arrangements.",
    },
];

pub fn find_style(style_id: &str) -> Option<&'static StylePreset> {
    let style_id = style_id.trim();
    STYLE_PRESETS.iter().find(|preset| preset.id == style_id)
}

pub fn default_style() -> &'static StylePreset {
    &STYLE_PRESETS[0]
}

/// Looks up a preset, substituting the default for ids that are blank or no
/// longer part of the catalog.
pub fn resolve_style(style_id: &str) -> &'static StylePreset {
    match find_style(style_id) {
        Some(preset) => preset,
        None => {
            tracing::debug!(style_id, fallback = DEFAULT_STYLE_ID, "unknown style id");
            default_style()
        }
    }
}

pub fn build_feed_prompt(image_count: usize, style: &StylePreset) -> String {
    let noun = if image_count > 1 {
        "these products"
    } else {
        "this product"
    };

    format!(
        "Create a 9-image Instagram feed for {noun} {} The feed must use different locations, angles, and compositions while maintaining a cohesive visual style. The output must be a single high-resolution grid image.",
        style.prompt
    )
}
