/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Element classification types.
//!
//! Every pushed element is classified exactly once, before it is enqueued,
//! into an ordering key and a [`Category`]. The pair travels with the
//! payload as a [`DecoratedElement`] for as long as it sits in a queue.

use serde::{Deserialize, Serialize};

/// Ordering key reserved for the authoritative end-of-time pulse.
///
/// When the extractor dispatches a time pulse carrying this key, a running
/// engine starts flushing.
pub const END_OF_TIME: u64 = u64::MAX;

/// How the extractor treats an element.
///
/// # Examples
///
/// ```
/// use event_sequencer::Category;
///
/// assert!(Category::NormedEvent.is_normed());
/// assert!(Category::InstantPassElement.is_instant_pass());
/// assert!(!Category::Undefined.is_normed());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    /// Rejected at push time, never enqueued.
    #[default]
    Undefined = 0,
    /// Data element merged by ordering key.
    NormedElement = 1,
    /// Control event merged by ordering key.
    NormedEvent = 2,
    /// Data element dispatched as soon as it reaches a queue head.
    InstantPassElement = 3,
    /// Control event dispatched as soon as it reaches a queue head.
    InstantPassEvent = 4,
    /// Data element discarded as soon as it reaches a queue head.
    InstantDropElement = 5,
    /// Control event discarded as soon as it reaches a queue head.
    InstantDropEvent = 6,
}

impl Category {
    /// Returns `true` if the element takes part in key ordering.
    #[inline]
    #[must_use]
    pub fn is_normed(self) -> bool {
        matches!(self, Self::NormedElement | Self::NormedEvent)
    }

    /// Returns `true` if the element bypasses ordering and is dispatched.
    #[inline]
    #[must_use]
    pub fn is_instant_pass(self) -> bool {
        matches!(self, Self::InstantPassElement | Self::InstantPassEvent)
    }

    /// Returns `true` if the element bypasses ordering and is discarded.
    #[inline]
    #[must_use]
    pub fn is_instant_drop(self) -> bool {
        matches!(self, Self::InstantDropElement | Self::InstantDropEvent)
    }

    /// Returns `true` for the control-event variants.
    #[inline]
    #[must_use]
    pub fn is_event(self) -> bool {
        matches!(
            self,
            Self::NormedEvent | Self::InstantPassEvent | Self::InstantDropEvent
        )
    }

    #[inline]
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::NormedElement,
            2 => Self::NormedEvent,
            3 => Self::InstantPassElement,
            4 => Self::InstantPassEvent,
            5 => Self::InstantDropElement,
            6 => Self::InstantDropEvent,
            _ => Self::Undefined,
        }
    }
}

/// A payload together with the key and category its classifier assigned.
///
/// Owned by exactly one queue slot at a time and moved out on dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedElement<T> {
    /// Merge key.
    pub key: u64,

    /// Extraction policy.
    pub category: Category,

    /// The application payload.
    pub payload: T,
}

impl<T> DecoratedElement<T> {
    /// Creates a decorated element.
    #[must_use]
    pub fn new(key: u64, category: Category, payload: T) -> Self {
        Self {
            key,
            category,
            payload,
        }
    }

    /// Consumes the element and returns its payload.
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Maps an element to its ordering key and category.
///
/// Implementations must be deterministic and free of side effects; the
/// engine calls `classify` exactly once per pushed element, on the
/// producer's thread.
///
/// Any `Fn(&T) -> (u64, Category)` closure is a classifier.
///
/// # Examples
///
/// ```
/// use event_sequencer::{Category, Classifier};
///
/// let by_value = |value: &u64| (*value, Category::NormedElement);
/// assert_eq!(by_value.classify(&7), (7, Category::NormedElement));
/// ```
pub trait Classifier<T>: Send + Sync {
    /// Returns `(ordering_key, category)` for `element`.
    fn classify(&self, element: &T) -> (u64, Category);
}

impl<T, F> Classifier<T> for F
where
    F: Fn(&T) -> (u64, Category) + Send + Sync,
{
    #[inline]
    fn classify(&self, element: &T) -> (u64, Category) {
        self(element)
    }
}

/// Classifier that passes every element straight through.
///
/// Always returns `(0, Category::InstantPassElement)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<T> Classifier<T> for DefaultClassifier {
    #[inline]
    fn classify(&self, _element: &T) -> (u64, Category) {
        (0, Category::InstantPassElement)
    }
}
