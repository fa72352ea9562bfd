//! Language code to speech-recognizer locale.

const LOCALES: &[(&str, &str)] = &[
    ("en", "en-US"),
    ("te", "te-IN"),
    ("hi", "hi-IN"),
    ("ta", "ta-IN"),
    ("kn", "kn-IN"),
    ("ml", "ml-IN"),
    ("mr", "mr-IN"),
    ("bn", "bn-IN"),
    ("gu", "gu-IN"),
    ("pa", "pa-IN"),
    ("es", "es-ES"),
    ("fr", "fr-FR"),
    ("de", "de-DE"),
    ("it", "it-IT"),
    ("pt", "pt-PT"),
    ("ru", "ru-RU"),
    ("zh", "zh-CN"),
    ("ja", "ja-JP"),
    ("ko", "ko-KR"),
    ("ar", "ar-SA"),
];

const FALLBACK: &str = "en-US";

/// Recognizer locale for a language code. Unknown codes fall back to US
/// English. Matching ignores case and any region suffix (`pt-BR` -> `pt`).
pub fn speech_locale(language: &str) -> &'static str {
    let primary = language
        .split(&['-', '_'][..])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    LOCALES
        .iter()
        .find(|(code, _)| *code == primary)
        .map_or(FALLBACK, |&(_, locale)| locale)
}
