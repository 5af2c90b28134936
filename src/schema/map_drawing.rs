use super::ColumnAddition;

/// Map drawing questions
///
/// `Questions` gains the authoring configuration for map drawing questions:
/// drawing config, guidance and reference overlays, the review rubric, which
/// building layers to show, and a per-question time limit.
///
/// `AnswerRecords` gains the drawing duration, client metadata captured at
/// submission, and per-rubric-item scores.
///
/// All text columns are nullable. Integer columns default to 0 so existing
/// rows remain valid.
pub const MAP_DRAWING_COLUMNS: &[ColumnAddition] = &[
    // Questions
    ColumnAddition {
        table: "Questions",
        column: "MapDrawingConfigJson",
        definition: "TEXT",
    },
    ColumnAddition {
        table: "Questions",
        column: "GuidanceOverlaysJson",
        definition: "TEXT",
    },
    ColumnAddition {
        table: "Questions",
        column: "ReferenceOverlaysJson",
        definition: "TEXT",
    },
    ColumnAddition {
        table: "Questions",
        column: "ReviewRubricJson",
        definition: "TEXT",
    },
    ColumnAddition {
        table: "Questions",
        column: "TimeLimitSeconds",
        definition: "INTEGER NOT NULL DEFAULT 0",
    },
    ColumnAddition {
        table: "Questions",
        column: "ShowBuildingLayersJson",
        definition: "TEXT",
    },
    // AnswerRecords
    ColumnAddition {
        table: "AnswerRecords",
        column: "DrawDurationSeconds",
        definition: "INTEGER NOT NULL DEFAULT 0",
    },
    ColumnAddition {
        table: "AnswerRecords",
        column: "ClientInfoJson",
        definition: "TEXT",
    },
    ColumnAddition {
        table: "AnswerRecords",
        column: "RubricScoresJson",
        definition: "TEXT",
    },
];

pub const MAP_DRAWING_SENTINEL: (&str, &str) = ("Questions", "MapDrawingConfigJson");
