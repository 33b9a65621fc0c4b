//! Landmark diversity for selfie-style requests.
//!
//! Each supported city carries a small fixed list of landmarks. Selection
//! prefers a landmark never used for the (soul, city, scope) triple; once the
//! list is exhausted it falls back to the least-recently-used one and flags
//! the repeat so prompt composition can vary the camera angle instead.

use anyhow::Result;
use uuid::Uuid;

use crate::catalog::store::LandmarkLog;
use crate::lww::now_ms;
use crate::models::media::LandmarkUsageRow;

pub const GLOBAL_SCOPE: &str = "global";

pub fn city_landmarks(city_key: &str) -> Option<&'static [&'static str]> {
    match city_key {
        "paris" => Some(&[
            "eiffel_tower",
            "louvre",
            "montmartre",
            "pont_alexandre_iii",
            "notre_dame",
            "arc_de_triomphe",
            "champs_elysees",
            "sacre_coeur",
        ]),
        "tokyo" => Some(&[
            "tokyo_tower",
            "skytree",
            "sensoji_temple",
            "shibuya_crossing",
            "harajuku",
            "ginza",
            "imperial_palace",
            "meiji_shrine",
        ]),
        "newyork" => Some(&[
            "statue_of_liberty",
            "empire_state_building",
            "times_square",
            "central_park",
            "brooklyn_bridge",
            "wall_street",
            "high_line",
            "broadway",
        ]),
        "london" => Some(&[
            "big_ben",
            "london_eye",
            "tower_bridge",
            "buckingham_palace",
            "westminster_abbey",
            "hyde_park",
            "covent_garden",
            "camden_market",
        ]),
        "rome" => Some(&[
            "colosseum",
            "vatican",
            "trevi_fountain",
            "pantheon",
            "spanish_steps",
            "roman_forum",
            "sistine_chapel",
            "piazza_navona",
        ]),
        _ => None,
    }
}

/// Human-readable phrase for prompt composition. Unknown keys pass through.
pub fn landmark_description(landmark_key: &str) -> &str {
    match landmark_key {
        "eiffel_tower" => "Eiffel Tower with iron lattice structure",
        "louvre" => "Louvre Museum with glass pyramid",
        "montmartre" => "Montmartre hill with Sacré-Cœur",
        "pont_alexandre_iii" => "Pont Alexandre III bridge",
        "notre_dame" => "Notre-Dame Cathedral",
        "arc_de_triomphe" => "Arc de Triomphe monument",
        "champs_elysees" => "Champs-Élysées avenue",
        "sacre_coeur" => "Sacré-Cœur Basilica",
        "tokyo_tower" => "Tokyo Tower red and white structure",
        "skytree" => "Tokyo Skytree tower",
        "sensoji_temple" => "Sensō-ji Buddhist temple",
        "shibuya_crossing" => "Shibuya crossing intersection",
        "harajuku" => "Harajuku fashion district",
        "ginza" => "Ginza shopping district",
        "imperial_palace" => "Imperial Palace gardens",
        "meiji_shrine" => "Meiji Shrine forest",
        "statue_of_liberty" => "Statue of Liberty monument",
        "empire_state_building" => "Empire State Building skyscraper",
        "times_square" => "Times Square neon lights",
        "central_park" => "Central Park green space",
        "brooklyn_bridge" => "Brooklyn Bridge suspension",
        "wall_street" => "Wall Street financial district",
        "high_line" => "High Line elevated park",
        "broadway" => "Broadway theater district",
        "big_ben" => "Big Ben clock tower",
        "london_eye" => "London Eye ferris wheel",
        "tower_bridge" => "Tower Bridge bascule",
        "buckingham_palace" => "Buckingham Palace royal residence",
        "westminster_abbey" => "Westminster Abbey church",
        "hyde_park" => "Hyde Park green space",
        "covent_garden" => "Covent Garden market",
        "camden_market" => "Camden Market alternative",
        "colosseum" => "Colosseum ancient amphitheater",
        "vatican" => "Vatican City state",
        "trevi_fountain" => "Trevi Fountain baroque",
        "pantheon" => "Pantheon ancient temple",
        "spanish_steps" => "Spanish Steps staircase",
        "roman_forum" => "Roman Forum ruins",
        "sistine_chapel" => "Sistine Chapel ceiling",
        "piazza_navona" => "Piazza Navona square",
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct ChosenPlace {
    pub landmark_key: String,
    /// True when every landmark for the city has been used in this scope and
    /// the least-recently-used one is being served again.
    pub repeated: bool,
}

/// Picks a landmark for (soul, city) scoped to `user` when given, otherwise
/// globally, and records the usage (LWW overwrite, no transaction). Returns
/// None for an unsupported city.
pub async fn choose<L: LandmarkLog + Sync + ?Sized>(
    log: &L,
    soul_id: &str,
    city_key: &str,
    user: Option<Uuid>,
) -> Result<Option<ChosenPlace>> {
    let Some(landmarks) = city_landmarks(city_key) else {
        return Ok(None);
    };

    let scope = user
        .map(|u| u.to_string())
        .unwrap_or_else(|| GLOBAL_SCOPE.to_string());
    let usages = log.landmark_usages(soul_id, city_key, &scope).await?;

    let unused = landmarks
        .iter()
        .find(|lm| !usages.iter().any(|u| u.landmark_key == **lm));

    let (landmark_key, repeated) = match unused {
        Some(lm) => ((*lm).to_string(), false),
        None => {
            // All used at least once: serve the least-recently-used.
            let lru = usages
                .iter()
                .filter(|u| landmarks.contains(&u.landmark_key.as_str()))
                .min_by(|a, b| {
                    a.used_at_ts
                        .cmp(&b.used_at_ts)
                        .then_with(|| a.landmark_key.cmp(&b.landmark_key))
                })
                .map(|u| u.landmark_key.clone())
                .unwrap_or_else(|| landmarks[0].to_string());
            (lru, true)
        }
    };

    log.record_landmark_use(&LandmarkUsageRow {
        soul_id: soul_id.to_string(),
        city_key: city_key.to_string(),
        landmark_key: landmark_key.clone(),
        user_scope: scope,
        used_at_ts: now_ms(),
    })
    .await?;

    Ok(Some(ChosenPlace {
        landmark_key,
        repeated,
    }))
}
