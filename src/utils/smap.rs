// Structural mapping over the immediate children of a tree node. Each AST
// node implements these traits once, rebuilding itself with children of kind
// T passed through the provided function. A pass that overrides no node kind
// and uses the default arm everywhere is the identity rewrite.

pub trait SMapAccum<T> {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<(A, T), E>
    ) -> Result<(A, Self), E> where Self: Sized;

    fn smap_result<E>(
        self,
        f: impl Fn(T) -> Result<T, E>
    ) -> Result<Self, E> where Self: Sized {
        let (_, node) = self.smap_accum_l_result(Ok(()), |_, t| Ok(((), f(t)?)))?;
        Ok(node)
    }

    fn smap(self, f: impl Fn(T) -> T) -> Self where Self: Sized {
        let res: Result<Self, ()> = self.smap_result(|t| Ok(f(t)));
        match res {
            Ok(node) => node,
            Err(()) => unreachable!()
        }
    }
}

pub trait SFold<T> {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E>;

    fn sfold<A>(&self, acc: A, f: impl Fn(A, &T) -> A) -> A {
        let res: Result<A, ()> = self.sfold_result(Ok(acc), |acc, t| Ok(f(acc, t)));
        match res {
            Ok(acc) => acc,
            Err(()) => unreachable!()
        }
    }
}

pub trait SFoldOwned<T> {
    fn sfold_owned_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<A, E>
    ) -> Result<A, E>;

    fn sfold_owned<A>(self, acc: A, f: impl Fn(A, T) -> A) -> A where Self: Sized {
        let res: Result<A, ()> = self.sfold_owned_result(Ok(acc), |acc, t| Ok(f(acc, t)));
        match res {
            Ok(acc) => acc,
            Err(()) => unreachable!()
        }
    }
}

impl<T> SMapAccum<T> for Vec<T> {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<(A, T), E>
    ) -> Result<(A, Vec<T>), E> {
        self.into_iter()
            .fold(acc.map(|acc| (acc, vec![])), |acc, t| {
                let (acc, mut elems) = acc?;
                let (acc, t) = f(acc, t)?;
                elems.push(t);
                Ok((acc, elems))
            })
    }
}

impl<T> SFold<T> for Vec<T> {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E> {
        self.iter().fold(acc, |acc, t| f(acc?, t))
    }
}

impl<T> SFoldOwned<T> for Vec<T> {
    fn sfold_owned_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<A, E>
    ) -> Result<A, E> {
        self.into_iter().fold(acc, |acc, t| f(acc?, t))
    }
}

impl<T> SFold<T> for [T] {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E> {
        self.iter().fold(acc, |acc, t| f(acc?, t))
    }
}

impl<T> SMapAccum<T> for Option<T> {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<(A, T), E>
    ) -> Result<(A, Option<T>), E> {
        match self {
            Some(t) => {
                let (acc, t) = f(acc?, t)?;
                Ok((acc, Some(t)))
            },
            None => Ok((acc?, None))
        }
    }
}

impl<T> SFold<T> for Option<T> {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Some(t) => f(acc?, t),
            None => acc
        }
    }
}

impl<T> SMapAccum<T> for Box<T> {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<(A, T), E>
    ) -> Result<(A, Box<T>), E> {
        let (acc, t) = f(acc?, *self)?;
        Ok((acc, Box::new(t)))
    }
}

impl<T> SFold<T> for Box<T> {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E> {
        f(acc?, self)
    }
}

impl<T> SMapAccum<T> for Option<Box<T>> {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, T) -> Result<(A, T), E>
    ) -> Result<(A, Option<Box<T>>), E> {
        match self {
            Some(t) => {
                let (acc, t) = f(acc?, *t)?;
                Ok((acc, Some(Box::new(t))))
            },
            None => Ok((acc?, None))
        }
    }
}

impl<T> SFold<T> for Option<Box<T>> {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &T) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Some(t) => f(acc?, t),
            None => acc
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn smap_vec_identity() {
        let v = vec![1, 2, 3];
        assert_eq!(v.clone().smap(|x| x), v);
    }

    #[test]
    fn smap_accum_vec_threads_left_to_right() {
        let v = vec![1, 2, 3];
        let r: Result<(Vec<i32>, Vec<i32>), ()> =
            v.smap_accum_l_result(Ok(vec![]), |mut acc, x| {
                acc.push(x);
                Ok((acc, x * 2))
            });
        let (order, mapped) = r.unwrap();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(mapped, vec![2, 4, 6]);
    }

    #[test]
    fn smap_result_vec_propagates_error() {
        let v = vec![1, 2, 3];
        let r = v.smap_result(|x| if x == 2 { Err("two") } else { Ok(x) });
        assert_eq!(r, Err("two"));
    }

    #[test]
    fn sfold_option_none() {
        let v: Option<i32> = None;
        assert_eq!(v.sfold(7, |acc, x| acc + x), 7);
    }

    #[test]
    fn sfold_boxed_option() {
        let v: Option<Box<i32>> = Some(Box::new(3));
        assert_eq!(SFold::<i32>::sfold(&v, 7, |acc, x| acc + x), 10);
    }

    #[test]
    fn sfold_owned_vec() {
        let v = vec![1, 2, 3];
        assert_eq!(v.sfold_owned(0, |acc, x| acc + x), 6);
    }
}
