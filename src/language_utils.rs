use anyhow::{Result, anyhow};
use isolang::Language;

/// Language utilities for locale tags
///
/// The translation provider speaks in `language-REGION` tags such as
/// `fr-FR` or `ar-SA`. The primary subtag is checked against ISO 639
/// (2- or 3-letter), the region against ISO 3166 alpha-2 or UN M.49 shape.
/// Language code type of the primary subtag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageCodeType {
    /// ISO 639-1 (2-letter) code
    Part1,
    /// ISO 639-3 (3-letter) code
    Part3,
}

/// Split a locale tag into its primary language and optional region
pub fn split_locale(code: &str) -> (&str, Option<&str>) {
    let code = code.trim();
    match code.split_once(['-', '_']) {
        Some((primary, region)) => (primary, Some(region)),
        None => (code, None),
    }
}

/// Validate the primary language subtag of a locale tag
pub fn validate_language_code(code: &str) -> Result<LanguageCodeType> {
    let (primary, _) = split_locale(code);
    let primary = primary.to_lowercase();

    match primary.len() {
        2 if Language::from_639_1(&primary).is_some() => Ok(LanguageCodeType::Part1),
        3 if Language::from_639_3(&primary).is_some() => Ok(LanguageCodeType::Part3),
        _ => Err(anyhow!("Invalid language code: {}", code)),
    }
}

/// Validate a full locale tag such as `fr-FR`
pub fn validate_locale(code: &str) -> Result<()> {
    validate_language_code(code)?;

    if let (_, Some(region)) = split_locale(code) {
        let is_alpha2 = region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic());
        let is_numeric = region.len() == 3 && region.chars().all(|c| c.is_ascii_digit());
        if !is_alpha2 && !is_numeric {
            return Err(anyhow!("Invalid region in locale tag: {}", code));
        }
    }

    Ok(())
}

/// Normalize casing of a locale tag: `FR_fr` becomes `fr-FR`
pub fn normalize_locale(code: &str) -> Result<String> {
    validate_locale(code)?;

    let (primary, region) = split_locale(code);
    Ok(match region {
        Some(region) => format!("{}-{}", primary.to_lowercase(), region.to_uppercase()),
        None => primary.to_lowercase(),
    })
}

/// Check if two locale tags name the same language and region
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (normalize_locale(code1), normalize_locale(code2)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Get the English language name of a locale tag's primary subtag
pub fn get_language_name(code: &str) -> Result<String> {
    let (primary, _) = split_locale(code);
    let primary = primary.to_lowercase();

    let lang = match primary.len() {
        2 => Language::from_639_1(&primary),
        3 => Language::from_639_3(&primary),
        _ => None,
    }
    .ok_or_else(|| anyhow!("Failed to get language from code: {}", code))?;

    Ok(lang.to_name().to_string())
}

/// Extract the target language from a provider language pair
///
/// `"en-US|fr-FR"` yields `fr-FR`.
pub fn target_language_from_langpair(langpair: &str) -> Result<String> {
    let (_, target) = langpair
        .split_once('|')
        .ok_or_else(|| anyhow!("Language pair '{}' has no '|' separator", langpair))?;

    let target = target.trim();
    if target.is_empty() {
        return Err(anyhow!("Language pair '{}' has an empty target", langpair));
    }

    Ok(target.to_string())
}
