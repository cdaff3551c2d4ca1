//! Pitches, scales and the Roman-numeral chord table.
//!
//! Chords are described as lists of scale tones (1-based degree plus a
//! chromatic alteration) so that borrowed chords such as `V/vi` and `bVII`
//! resolve against whatever major scale the engine plays in.

use std::fmt;
use std::str::FromStr;

/// The twelve pitch classes, spelled with sharps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

const PITCH_CLASSES: [PitchClass; 12] = [
    PitchClass::C,
    PitchClass::CSharp,
    PitchClass::D,
    PitchClass::DSharp,
    PitchClass::E,
    PitchClass::F,
    PitchClass::FSharp,
    PitchClass::G,
    PitchClass::GSharp,
    PitchClass::A,
    PitchClass::ASharp,
    PitchClass::B,
];

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

impl PitchClass {
    /// Pitch class for a semitone offset from C (wraps).
    pub fn from_semitone(semitone: i32) -> Self {
        PITCH_CLASSES[semitone.rem_euclid(12) as usize]
    }

    /// Semitones above C.
    pub fn semitone(self) -> u8 {
        self as u8
    }

    /// Name with sharps, e.g. `"F#"`.
    pub fn name(self) -> &'static str {
        PITCH_NAMES[self as usize]
    }

    /// Parse a pitch class such as `"G"`, `"f#"` or `"Bb"`.
    pub fn parse(name: &str) -> Option<Self> {
        let mut chars = name.trim().chars().peekable();
        let base: i32 = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let mut accidental = 0;
        for c in chars {
            match c {
                '#' | '♯' => accidental += 1,
                'b' | '♭' => accidental -= 1,
                _ => return None,
            }
        }
        Some(Self::from_semitone(base + accidental))
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A MIDI pitch (60 = C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pitch(pub u8);

impl Pitch {
    /// Build a pitch from a pitch class and scientific octave.
    pub fn new(class: PitchClass, octave: i8) -> Self {
        Self::from_midi((octave as i32 + 1) * 12 + class.semitone() as i32)
    }

    /// Clamp an arbitrary MIDI number into 0..=127.
    pub fn from_midi(midi: i32) -> Self {
        Self(midi.clamp(0, 127) as u8)
    }

    pub fn midi(self) -> u8 {
        self.0
    }

    pub fn pitch_class(self) -> PitchClass {
        PitchClass::from_semitone(self.0 as i32)
    }

    pub fn octave(self) -> i8 {
        (self.0 / 12) as i8 - 1
    }

    /// Shift by semitones, clamped to the MIDI range.
    pub fn transpose(self, semitones: i32) -> Self {
        Self::from_midi(self.0 as i32 + semitones)
    }

    /// Equal-tempered frequency with A4 = 440 Hz.
    pub fn frequency(self) -> f32 {
        440.0 * 2f32.powf((self.0 as f32 - 69.0) / 12.0)
    }

    /// Parse a note name like `"C4"`, `"F#5"` or `"Bb3"`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let split = name
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '-')
            .map(|(i, _)| i)?;
        let class = PitchClass::parse(&name[..split])?;
        let octave: i8 = name[split..].parse().ok()?;
        let midi = (octave as i32 + 1) * 12 + class.semitone() as i32;
        if (0..=127).contains(&midi) {
            Some(Self(midi as u8))
        } else {
            None
        }
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class().name(), self.octave())
    }
}

/// A degree of the scale (1..=7) with an optional chromatic alteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleTone {
    pub degree: u8,
    pub alteration: i8,
}

impl ScaleTone {
    pub const fn natural(degree: u8) -> Self {
        Self {
            degree,
            alteration: 0,
        }
    }

    pub const fn sharp(degree: u8) -> Self {
        Self {
            degree,
            alteration: 1,
        }
    }

    pub const fn flat(degree: u8) -> Self {
        Self {
            degree,
            alteration: -1,
        }
    }
}

/// Progression tokens understood by the state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChordDegree {
    I,
    Vi,
    Iv,
    V,
    /// Secondary dominant of vi (major chord on the third degree).
    VOfVi,
    /// Major chord on the lowered seventh, borrowed from mixolydian.
    FlatVii,
    IMaj7,
    Vi7,
    IvMaj7,
    V7,
}

use ScaleTone as T;

impl ChordDegree {
    /// All chord degrees, in table order.
    pub const ALL: [ChordDegree; 10] = [
        ChordDegree::I,
        ChordDegree::Vi,
        ChordDegree::Iv,
        ChordDegree::V,
        ChordDegree::VOfVi,
        ChordDegree::FlatVii,
        ChordDegree::IMaj7,
        ChordDegree::Vi7,
        ChordDegree::IvMaj7,
        ChordDegree::V7,
    ];

    /// Chord tones from the root upwards.
    pub fn tones(self) -> &'static [ScaleTone] {
        const I: [ScaleTone; 3] = [T::natural(1), T::natural(3), T::natural(5)];
        const VI: [ScaleTone; 3] = [T::natural(6), T::natural(1), T::natural(3)];
        const IV: [ScaleTone; 3] = [T::natural(4), T::natural(6), T::natural(1)];
        const V: [ScaleTone; 3] = [T::natural(5), T::natural(7), T::natural(2)];
        const V_OF_VI: [ScaleTone; 3] = [T::natural(3), T::sharp(5), T::natural(7)];
        const FLAT_VII: [ScaleTone; 3] = [T::flat(7), T::natural(2), T::natural(4)];
        const I_MAJ7: [ScaleTone; 4] = [T::natural(1), T::natural(3), T::natural(5), T::natural(7)];
        const VI7: [ScaleTone; 4] = [T::natural(6), T::natural(1), T::natural(3), T::natural(5)];
        const IV_MAJ7: [ScaleTone; 4] = [T::natural(4), T::natural(6), T::natural(1), T::natural(3)];
        const V7: [ScaleTone; 4] = [T::natural(5), T::natural(7), T::natural(2), T::natural(4)];

        match self {
            ChordDegree::I => &I,
            ChordDegree::Vi => &VI,
            ChordDegree::Iv => &IV,
            ChordDegree::V => &V,
            ChordDegree::VOfVi => &V_OF_VI,
            ChordDegree::FlatVii => &FLAT_VII,
            ChordDegree::IMaj7 => &I_MAJ7,
            ChordDegree::Vi7 => &VI7,
            ChordDegree::IvMaj7 => &IV_MAJ7,
            ChordDegree::V7 => &V7,
        }
    }

    /// Progression token as written in the state table.
    pub fn token(self) -> &'static str {
        match self {
            ChordDegree::I => "I",
            ChordDegree::Vi => "vi",
            ChordDegree::Iv => "IV",
            ChordDegree::V => "V",
            ChordDegree::VOfVi => "V/vi",
            ChordDegree::FlatVii => "bVII",
            ChordDegree::IMaj7 => "Imaj7",
            ChordDegree::Vi7 => "vi7",
            ChordDegree::IvMaj7 => "IVmaj7",
            ChordDegree::V7 => "V7",
        }
    }
}

impl FromStr for ChordDegree {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChordDegree::ALL
            .iter()
            .copied()
            .find(|degree| degree.token() == s.trim())
            .ok_or_else(|| format!("unknown chord token '{}'", s))
    }
}

impl fmt::Display for ChordDegree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A seven-note scale anchored on a root pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    root: PitchClass,
    intervals: [u8; 7],
}

impl Scale {
    pub const MAJOR_INTERVALS: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

    pub fn major(root: PitchClass) -> Self {
        Self {
            root,
            intervals: Self::MAJOR_INTERVALS,
        }
    }

    pub fn root(&self) -> PitchClass {
        self.root
    }

    /// The seven pitch classes from the root upwards.
    pub fn pitch_classes(&self) -> [PitchClass; 7] {
        self.intervals
            .map(|interval| PitchClass::from_semitone(self.root.semitone() as i32 + interval as i32))
    }

    /// Pitch class of a (possibly altered) scale tone.
    pub fn tone_class(&self, tone: ScaleTone) -> PitchClass {
        let index = (tone.degree.max(1) as usize - 1) % 7;
        PitchClass::from_semitone(
            self.root.semitone() as i32 + self.intervals[index] as i32 + tone.alteration as i32,
        )
    }

    /// Pitch of a zero-based scale step counted from the root in `octave`.
    ///
    /// Steps beyond 6 climb into the next octave; negative steps descend.
    pub fn step_pitch(&self, step: i32, octave: i8) -> Pitch {
        let octave_shift = step.div_euclid(7);
        let index = step.rem_euclid(7) as usize;
        Pitch::new(self.root, octave)
            .transpose(octave_shift * 12 + self.intervals[index] as i32)
    }

    /// Resolve a chord degree to pitches: the root sits in `octave` and each
    /// further tone is the nearest pitch of its class above the previous one.
    pub fn chord(&self, degree: ChordDegree, octave: i8) -> Vec<Pitch> {
        let mut pitches: Vec<Pitch> = Vec::with_capacity(4);
        for tone in degree.tones() {
            let class = self.tone_class(*tone);
            let pitch = match pitches.last() {
                None => Pitch::new(class, octave),
                Some(previous) => {
                    let up = (class.semitone() as i32 - previous.pitch_class().semitone() as i32)
                        .rem_euclid(12);
                    previous.transpose(if up == 0 { 12 } else { up })
                }
            };
            pitches.push(pitch);
        }
        pitches
    }
}

impl Default for Scale {
    /// The game plays in G major.
    fn default() -> Self {
        Self::major(PitchClass::G)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(pitches: &[Pitch]) -> Vec<PitchClass> {
        pitches.iter().map(|p| p.pitch_class()).collect()
    }

    #[test]
    fn test_g_major_pitch_classes() {
        use PitchClass::*;
        assert_eq!(Scale::major(G).pitch_classes(), [G, A, B, C, D, E, FSharp]);
    }

    #[test]
    fn test_tonic_chord_in_g() {
        use PitchClass::*;
        let chord = Scale::major(G).chord(ChordDegree::I, 4);
        assert_eq!(classes(&chord), vec![G, B, D]);
        assert_eq!(chord[0], Pitch::new(G, 4));
        assert!(chord.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_relative_minor_chord_in_g() {
        use PitchClass::*;
        let chord = Scale::major(G).chord(ChordDegree::Vi, 4);
        assert_eq!(classes(&chord), vec![E, G, B]);
        assert_eq!(chord[0].to_string(), "E4");
    }

    #[test]
    fn test_borrowed_chords() {
        use PitchClass::*;
        let scale = Scale::major(G);
        assert_eq!(classes(&scale.chord(ChordDegree::VOfVi, 3)), vec![B, DSharp, FSharp]);
        assert_eq!(classes(&scale.chord(ChordDegree::FlatVii, 3)), vec![F, A, C]);
        assert_eq!(classes(&scale.chord(ChordDegree::V7, 3)), vec![D, FSharp, A, C]);
    }

    #[test]
    fn test_chord_tokens_parse() {
        for degree in ChordDegree::ALL {
            assert_eq!(degree.token().parse::<ChordDegree>(), Ok(degree));
        }
        assert!("ii".parse::<ChordDegree>().is_err());
    }

    #[test]
    fn test_step_pitch_wraps_octaves() {
        let scale = Scale::default();
        assert_eq!(scale.step_pitch(0, 4).to_string(), "G4");
        assert_eq!(scale.step_pitch(6, 4).to_string(), "F#5");
        assert_eq!(scale.step_pitch(7, 4).to_string(), "G5");
        assert_eq!(scale.step_pitch(-1, 4).to_string(), "F#4");
    }

    #[test]
    fn test_note_names() {
        assert_eq!(Pitch::parse("C4"), Some(Pitch(60)));
        assert_eq!(Pitch::parse("F#5"), Some(Pitch(78)));
        assert_eq!(Pitch::parse("Bb3"), Some(Pitch(58)));
        assert_eq!(Pitch::parse("H2"), None);
        assert_eq!(Pitch(69).to_string(), "A4");
        assert!((Pitch(69).frequency() - 440.0).abs() < 0.01);
    }
}
