//! Bytecode flags understood by the device-side interpreter.
//!
//! Every instruction starts with one of these bytes.  Values are fixed by
//! the controller firmware and must not be renumbered.

pub const NONE: u8 = 0;

/* drawings */
pub const DRAWING_SET: u8 = 1;
pub const DRAWING_ADD: u8 = 2;
pub const DRAWING_SUB: u8 = 3;
pub const DRAWING_SCALE: u8 = 4;
pub const DRAWING_FILTER: u8 = 5;

/* layer operations */
pub const LAYER_SET: u8 = 6;
pub const LAYER_ADD: u8 = 7;
pub const LAYER_SUB: u8 = 8;
pub const LAYER_SCALE: u8 = 9;
pub const LAYER_FILTER: u8 = 10;

pub const SCOPE: u8 = 11;
pub const CLIP: u8 = 12;

/* sifters */
pub const SIFTER_SEGMENT: u8 = 13;
pub const SIFTER_CANVAS: u8 = 14;

/* event handlers */
pub const INTERACTIVE: u8 = 15;
pub const EVENT_CATCHER: u8 = 16;

/* scoped definitions */
pub const DECLARE_VARIABLE: u8 = 17;
pub const PARAMETER_MAP: u8 = 18;
pub const SCENE_EVENTS: u8 = 19;
pub const BERRY_SCRIPT: u8 = 20;

/* animations */
pub const ANIMATION_NONE: u8 = 32;
pub const ANIMATION_FILL: u8 = 33;
pub const ANIMATION_RAINBOW: u8 = 34;
pub const ANIMATION_FADE: u8 = 35;
pub const ANIMATION_PROJECTILE: u8 = 36;
pub const ANIMATION_LOADING: u8 = 37;
pub const ANIMATION_COLOR_ROLL: u8 = 38;
pub const ANIMATION_COLOR_GRADIENT3: u8 = 39;
pub const ANIMATION_COLOR_GRADIENT5: u8 = 40;
pub const ANIMATION_COLOR_GRADIENT2: u8 = 41;
pub const ANIMATION_COLOR_GRADIENT4: u8 = 42;
pub const ANIMATION_STREAM: u8 = 43;
pub const ANIMATION_DEFINED: u8 = 45;

/* modifiers */
pub const MODIFIER_BRIGHTNESS: u8 = 128;
pub const MODIFIER_TIMELINE: u8 = 129;
pub const MODIFIER_FADE_IN: u8 = 130;
pub const MODIFIER_FADE_OUT: u8 = 131;
pub const MODIFIER_SWITCH_COLORS: u8 = 132;
pub const MODIFIER_TIME_LOOP: u8 = 133;
pub const MODIFIER_TIME_SCALE: u8 = 134;
pub const MODIFIER_TIME_SCALE_SMOOTHED: u8 = 135;
pub const MODIFIER_TIME_CHANGE: u8 = 136;
pub const MODIFIER_TIME_SET: u8 = 137;

/* generators */
pub const GENERATOR_LAST_EVENT_VALUE: u8 = 144;
pub const GENERATOR_SINE: u8 = 145;
pub const GENERATOR_SAW: u8 = 146;
pub const GENERATOR_TRIANGLE: u8 = 147;
pub const GENERATOR_SQUARE: u8 = 148;
pub const GENERATOR_PERLIN_NOISE: u8 = 149;
pub const GENERATOR_SMOOTHOUT: u8 = 150;
pub const GENERATOR_COUNTER: u8 = 151;

/* value operations */
pub const OPERATION_ADD: u8 = 161;
pub const OPERATION_SUB: u8 = 162;
pub const OPERATION_MUL: u8 = 163;
pub const OPERATION_DIV: u8 = 164;
pub const OPERATION_MOD: u8 = 165;
pub const OPERATION_SCALE: u8 = 166;
pub const OPERATION_MAP: u8 = 167;

pub const READ_ADDRESS: u8 = 168;

/* objects */
pub const DEVICE: u8 = 176;
pub const SEGMENT: u8 = 177;
pub const SLICE: u8 = 178;
pub const PORT: u8 = 179;
pub const CANVAS: u8 = 180;
pub const MARKS: u8 = 181;
pub const ID: u8 = 182;

/* events */
pub const EVENT_AT: u8 = 183;
pub const EVENT_SET_VALUE: u8 = 184;
pub const EVENT_EMIT_LOCAL: u8 = 185;
pub const EVENT_RANDOM_CHOICE: u8 = 186;

/* values */
pub const MAC_ADDRESS: u8 = 187;
pub const TIMESTAMP: u8 = 188;
pub const COLOR: u8 = 189;
pub const PERCENTAGE: u8 = 190;
pub const LABEL: u8 = 191;
pub const PIXELS: u8 = 192;
pub const TUPLE: u8 = 193;

/* most used constants */
pub const TIMESTAMP_ZERO: u8 = 194;
pub const TIMESTAMP_MAX: u8 = 195;
pub const TIMESTAMP_MIN: u8 = 196;
pub const COLOR_WHITE: u8 = 197;
pub const COLOR_BLACK: u8 = 198;
pub const PERCENTAGE_ZERO: u8 = 199;
pub const PERCENTAGE_MAX: u8 = 200;
pub const PERCENTAGE_MIN: u8 = 201;

pub const NUMBER: u8 = 202;
pub const BOOLEAN: u8 = 203;
pub const NULL: u8 = 204;
pub const UNDEFINED: u8 = 205;

/* terminators */
pub const END_OF_SCOPE: u8 = 254;
pub const END_OF_TNGL_BYTES: u8 = 255;

// ---------------------------------------------------------------------------
// Literal limits
// ---------------------------------------------------------------------------

/// Largest timestamp representable by a TIMESTAMP value, in milliseconds.
pub const TIMESTAMP_MAX_MS: f64 = 86_400_000.0;
/// Smallest timestamp representable by a TIMESTAMP value, in milliseconds.
pub const TIMESTAMP_MIN_MS: f64 = -86_400_000.0;

pub const PERCENTAGE_MAX_VALUE: f64 = 100.0;
pub const PERCENTAGE_MIN_VALUE: f64 = -100.0;
/// Source percent to device fixed-point units.
pub const PERCENTAGE_SCALE: f64 = 1_000_000.0;

/// Fixed width of a label value on the wire.
pub const LABEL_LENGTH: usize = 5;

/// Value types shared by events, scenes and script constants.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined = 0,
    Null = 1,
    Boolean = 2,
    Pixels = 19,
    Color = 26,
    Date = 28,
    Number = 29,
    Percentage = 30,
    Label = 31,
    Timestamp = 32,
}

impl ValueType {
    pub const ALL: [ValueType; 10] = [
        ValueType::Undefined,
        ValueType::Null,
        ValueType::Boolean,
        ValueType::Pixels,
        ValueType::Color,
        ValueType::Date,
        ValueType::Number,
        ValueType::Percentage,
        ValueType::Label,
        ValueType::Timestamp,
    ];

    /// Upper-case constant name used inside script blocks.
    pub fn constant_name(self) -> &'static str {
        match self {
            ValueType::Undefined => "UNDEFINED",
            ValueType::Null => "NULL",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Pixels => "PIXELS",
            ValueType::Color => "COLOR",
            ValueType::Date => "DATE",
            ValueType::Number => "NUMBER",
            ValueType::Percentage => "PERCENTAGE",
            ValueType::Label => "LABEL",
            ValueType::Timestamp => "TIMESTAMP",
        }
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "undefined" => Ok(ValueType::Undefined),
            "null" => Ok(ValueType::Null),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "pixels" => Ok(ValueType::Pixels),
            "color" => Ok(ValueType::Color),
            "date" => Ok(ValueType::Date),
            "number" => Ok(ValueType::Number),
            "percentage" => Ok(ValueType::Percentage),
            "label" => Ok(ValueType::Label),
            "timestamp" | "time" => Ok(ValueType::Timestamp),
            _ => Err(format!("Unknown value type: {}", s)),
        }
    }
}

/// Keyword vocabulary: every bare word the compiler accepts as an opcode.
pub fn keyword_flag(word: &str) -> Option<u8> {
    Some(match word {
        "setDrawing" => DRAWING_SET,
        "addDrawing" => DRAWING_ADD,
        "subDrawing" => DRAWING_SUB,
        "scaDrawing" => DRAWING_SCALE,
        "filDrawing" => DRAWING_FILTER,
        "setLayer" => LAYER_SET,
        "addLayer" => LAYER_ADD,
        "subLayer" => LAYER_SUB,
        "scaLayer" => LAYER_SCALE,
        "filLayer" => LAYER_FILTER,
        "scope" => SCOPE,
        "clip" => CLIP,
        "siftSegments" => SIFTER_SEGMENT,
        "siftCanvases" => SIFTER_CANVAS,
        "interactive" => INTERACTIVE,
        "onEventStateSet" => EVENT_CATCHER,

        "animNone" => ANIMATION_NONE,
        "animFill" => ANIMATION_FILL,
        "animRainbow" => ANIMATION_RAINBOW,
        "animFade" => ANIMATION_FADE,
        "animPlasmaShot" => ANIMATION_PROJECTILE,
        "animLoadingBar" => ANIMATION_LOADING,
        "animColorRoll" => ANIMATION_COLOR_ROLL,
        "animColorGradient3" => ANIMATION_COLOR_GRADIENT3,
        "animColorGradient5" => ANIMATION_COLOR_GRADIENT5,
        "animColorGradient2" => ANIMATION_COLOR_GRADIENT2,
        "animColorGradient4" => ANIMATION_COLOR_GRADIENT4,
        "animStream" => ANIMATION_STREAM,
        "animDefined" => ANIMATION_DEFINED,

        "modifyBrightness" => MODIFIER_BRIGHTNESS,
        "modifyTimeline" => MODIFIER_TIMELINE,
        "modifyFadeIn" => MODIFIER_FADE_IN,
        "modifyFadeOut" => MODIFIER_FADE_OUT,
        "modifyColorSwitch" => MODIFIER_SWITCH_COLORS,
        "modifyTimeLoop" => MODIFIER_TIME_LOOP,
        "modifyTimeScale" => MODIFIER_TIME_SCALE,
        "modifyTimeScaleSmoothed" => MODIFIER_TIME_SCALE_SMOOTHED,
        "modifyTimeChange" => MODIFIER_TIME_CHANGE,
        "modifyTimeSet" => MODIFIER_TIME_SET,

        "genLastEventParam" => GENERATOR_LAST_EVENT_VALUE,
        "genSine" => GENERATOR_SINE,
        "genSaw" => GENERATOR_SAW,
        "genTriangle" => GENERATOR_TRIANGLE,
        "genSquare" => GENERATOR_SQUARE,
        "genPerlinNoise" => GENERATOR_PERLIN_NOISE,
        "genSmoothOut" => GENERATOR_SMOOTHOUT,
        "genCounter" => GENERATOR_COUNTER,

        "addValues" => OPERATION_ADD,
        "subValues" => OPERATION_SUB,
        "mulValues" => OPERATION_MUL,
        "divValues" => OPERATION_DIV,
        "modValues" => OPERATION_MOD,
        "scaValue" => OPERATION_SCALE,
        "mapValue" => OPERATION_MAP,

        "defDevice" => DEVICE,
        "defSegment" => SEGMENT,
        "slice" => SLICE,
        "port" => PORT,
        "defCanvas" => CANVAS,
        "defMarks" => MARKS,

        "at" => EVENT_AT,
        "setValue" => EVENT_SET_VALUE,
        "setEventState" => EVENT_EMIT_LOCAL,
        "randomChoice" => EVENT_RANDOM_CHOICE,
        "sceneEvents" => SCENE_EVENTS,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_names_round_trip() {
        for ty in ValueType::ALL {
            assert_eq!(ty.constant_name().parse::<ValueType>(), Ok(ty));
        }
    }

    #[test]
    fn keywords_resolve_to_their_opcodes() {
        assert_eq!(keyword_flag("onEventStateSet"), Some(EVENT_CATCHER));
        assert_eq!(keyword_flag("setEventState"), Some(EVENT_EMIT_LOCAL));
        assert_eq!(keyword_flag("animFill"), Some(ANIMATION_FILL));
        assert_eq!(keyword_flag("notAKeyword"), None);
    }
}
