use arrayvec::ArrayVec;
use core::ops;

pub trait VecLike: ops::Deref<Target = [<Self as VecLike>::Element]> + ops::DerefMut {
    // FIXME: Work-around for the lack of compiler support for adding a
    //        `const Default` bound to a non-`const` `impl`
    const DEFAULT: Self;
    type Element;
    fn is_empty(&self) -> bool;
    fn is_full(&self) -> bool;
    fn len(&self) -> usize;
    fn pop(&mut self) -> Option<Self::Element>;
    /// Append `x`. Returns `x` back if the container is full.
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element>;
}

impl<T, const N: usize> VecLike for ArrayVec<T, N> {
    const DEFAULT: Self = Self::new_const();
    type Element = T;
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn is_full(&self) -> bool {
        self.is_full()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element> {
        self.try_push(x).map_err(|e| e.element())
    }
}

#[cfg(test)]
impl<T> VecLike for Vec<T> {
    const DEFAULT: Self = Vec::new();
    type Element = T;
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn is_full(&self) -> bool {
        false
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element> {
        self.push(x);
        Ok(())
    }
}
